//! # Record Pipeline
//!
//! The single read/write path shared by every surface. Writes run inside
//! exactly one transaction per batch: validation and protection checks in
//! the pre phase, observers in registration order, and history plus cache
//! invalidation in the post phase. Partial success is never observable.

pub mod history;
pub mod invalidation;
pub mod observer;

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::adapter::Transaction;
use crate::core::context::SystemContext;
use crate::core::error::{ApiError, ApiResult};
use crate::core::record::{Record, ACCESS_COLUMNS, BASE_COLUMNS};
use crate::filter::{
    parse_aggregations, parse_filter, parse_group_by, parse_where, to_aggregate_sql, to_count_sql,
    to_select_sql, FilterDoc,
};
use crate::schema::{Schema, SchemaRegistry};

pub use observer::{Observer, ObserverEvent, ObserverRegistry, Operation, Phase, Target};

/// The observer-driven create/update/delete/revert path.
pub struct RecordPipeline {
    schemas: Arc<SchemaRegistry>,
    observers: ObserverRegistry,
}

impl RecordPipeline {
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            schemas,
            observers: ObserverRegistry::new(),
        }
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn register_observer(&mut self, observer: Arc<dyn Observer>) {
        self.observers.register(observer);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Pure read through the query engine.
    pub async fn select_any(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        filter: &Value,
    ) -> ApiResult<Vec<Record>> {
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_read(ctx)?;
        let doc = self.effective_doc(ctx, filter)?;
        self.select_with_doc(ctx, &schema, &doc)
    }

    /// Read one record or none.
    pub async fn select_one(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        filter: &Value,
    ) -> ApiResult<Option<Record>> {
        let mut rows = self.select_any(ctx, model_name, filter).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    /// Read one record; empty result raises `RECORD_NOT_FOUND`.
    pub async fn select_404(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        filter: &Value,
        message: Option<&str>,
    ) -> ApiResult<Record> {
        self.select_one(ctx, model_name, filter).await?.ok_or_else(|| {
            ApiError::RecordNotFound(
                message
                    .map(String::from)
                    .unwrap_or_else(|| model_name.to_string()),
            )
        })
    }

    /// COUNT(*) for a filter document.
    pub async fn count_any(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        filter: &Value,
    ) -> ApiResult<i64> {
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_read(ctx)?;
        let doc = self.effective_doc(ctx, filter)?;
        let q = to_count_sql(schema.table(), &doc, 1)?;
        let result = ctx.db().query(&q.sql, &q.params)?;
        Ok(result
            .rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    /// Grouped aggregation: `{aggregations, group_by?, where?, options?}`.
    pub async fn aggregate_any(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        body: &Value,
    ) -> ApiResult<Vec<Record>> {
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_read(ctx)?;

        let obj = body
            .as_object()
            .ok_or_else(|| ApiError::InvalidBody("aggregate body must be an object".into()))?;
        for key in obj.keys() {
            if !matches!(key.as_str(), "aggregations" | "group_by" | "where" | "options") {
                return Err(ApiError::validation(format!(
                    "unknown aggregate key '{}'",
                    key
                )));
            }
        }
        let aggregations = parse_aggregations(
            obj.get("aggregations")
                .ok_or_else(|| ApiError::validation("aggregations is required"))?,
        )?;
        let group_by = parse_group_by(obj.get("group_by"))?;

        let mut doc = FilterDoc {
            where_clause: match obj.get("where") {
                Some(w) => parse_where(w)?,
                None => None,
            },
            ..FilterDoc::default()
        };
        if let Some(options) = obj.get("options") {
            let parsed = parse_filter(&json!({ "options": options }))?;
            doc.trashed = parsed.trashed;
        }
        if doc.trashed.is_none() {
            doc.trashed = Some(ctx.options.trashed);
        }

        let q = to_aggregate_sql(schema.table(), &doc, &aggregations, &group_by, 1)?;
        let result = ctx.db().query(&q.sql, &q.params)?;
        Ok(result.rows)
    }

    /// Execute a saved filter by name.
    pub async fn run_filter(&self, ctx: &SystemContext, name: &str) -> ApiResult<Vec<Record>> {
        let saved = self
            .select_404(
                ctx,
                "filters",
                &json!({"where": {"name": name}}),
                Some(&format!("filter '{}'", name)),
            )
            .await?;

        let model_name = saved
            .get("model_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::internal("saved filter without model_name"))?
            .to_string();

        let mut doc = FilterDoc::default();
        if let Some(select) = decode_json_text(saved.get("select")) {
            doc.select = parse_filter(&json!({ "select": select }))?.select;
        }
        if let Some(where_doc) = decode_json_text(saved.get("where")) {
            doc.where_clause = parse_where(&where_doc)?;
        }
        if let Some(order) = decode_json_text(saved.get("order")) {
            doc.order = parse_filter(&json!({ "order": order }))?.order;
        }
        doc.limit = saved.get("limit").and_then(|v| v.as_i64());
        doc.offset = saved.get("offset").and_then(|v| v.as_i64());
        doc.trashed = Some(ctx.options.trashed);

        let schema = self.schemas.to_schema(ctx, &model_name)?;
        self.select_with_doc(ctx, &schema, &doc)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Batch create. Assigns ids, timestamps, and ACL defaults; validates
    /// each record; inserts in one transaction.
    pub async fn create_all(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        mut records: Vec<Record>,
    ) -> ApiResult<Vec<Record>> {
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_write(ctx, &schema, Operation::Create)?;
        if records.is_empty() {
            return Ok(records);
        }

        let now = now_string();
        for record in &mut records {
            prepare_new_record(record, &now)?;
            schema.validate_or_throw(record)?;
        }

        let tx = ctx.db().transaction()?;
        self.run_phase(ctx, &tx, &schema, Operation::Create, true, &mut records, None)?;

        let insert_sql = build_insert_sql(&schema);
        let columns = schema.columns();
        for record in &records {
            let values: Vec<Value> = columns
                .iter()
                .map(|c| encode_column(&schema, c, record.get(c).cloned().unwrap_or(Value::Null)))
                .collect();
            tx.execute(&insert_sql, &values)?;
        }

        self.run_phase(ctx, &tx, &schema, Operation::Create, false, &mut records, None)?;
        tx.commit()?;
        Ok(records)
    }

    /// Batch update. Every update must carry `id`; trashed or tombstoned
    /// rows abort the batch; the merged record is revalidated.
    pub async fn update_all(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        updates: Vec<Record>,
    ) -> ApiResult<Vec<Record>> {
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_write(ctx, &schema, Operation::Update)?;
        if updates.is_empty() {
            return Ok(updates);
        }
        let ids = require_ids(&updates)?;

        let tx = ctx.db().transaction()?;
        let existing = self.fetch_for_write(ctx, &tx, &schema, &ids)?;

        let now = now_string();
        let mut merged: Vec<Record> = Vec::with_capacity(updates.len());
        for (update, current) in updates.iter().zip(existing.iter()) {
            let mut next = current.clone();
            for (key, value) in update.0.iter() {
                if key == "id" {
                    continue;
                }
                if BASE_COLUMNS.contains(&key.as_str()) {
                    tracing::warn!(model = model_name, field = %key, "base column ignored in update");
                    continue;
                }
                next.set(key, value.clone());
            }
            schema.validate_or_throw(&mut next)?;
            next.set("updated_at", json!(now));
            merged.push(next);
        }

        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Update,
            true,
            &mut merged,
            Some(existing.as_slice()),
        )?;

        let field_columns: Vec<String> =
            schema.fields.iter().map(|f| f.field_name.clone()).collect();
        for record in &merged {
            update_row(&tx, &schema, &field_columns, record, &now)?;
        }

        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Update,
            false,
            &mut merged,
            Some(existing.as_slice()),
        )?;
        tx.commit()?;
        Ok(merged)
    }

    /// Filtered update: select, then apply the same changes to each hit.
    pub async fn update_any(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        filter: &Value,
        changes: &Record,
    ) -> ApiResult<Vec<Record>> {
        let hits = self.select_any(ctx, model_name, filter).await?;
        let updates: Vec<Record> = hits
            .iter()
            .filter_map(|hit| {
                hit.get("id").map(|id| {
                    let mut update = changes.clone();
                    update.set("id", id.clone());
                    update
                })
            })
            .collect();
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        self.update_all(ctx, model_name, updates).await
    }

    /// Batch soft delete: one UPDATE setting `trashed_at` over the id
    /// set. Fewer affected rows than requested aborts with
    /// `ALREADY_TRASHED`.
    pub async fn delete_all(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        ids: Vec<String>,
    ) -> ApiResult<Vec<Record>> {
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_write(ctx, &schema, Operation::Delete)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let tx = ctx.db().transaction()?;
        let mut existing = self.fetch_for_delete(ctx, &tx, &schema, &ids)?;
        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Delete,
            true,
            &mut existing,
            None,
        )?;

        let now = now_string();
        let placeholders: Vec<String> = (2..2 + ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "UPDATE {} SET \"trashed_at\" = ?1, \"updated_at\" = ?1 \
             WHERE \"id\" IN ({}) AND \"trashed_at\" IS NULL AND \"deleted_at\" IS NULL \
             RETURNING *",
            crate::filter::quote_ident(schema.table())?,
            placeholders.join(", ")
        );
        let mut params = vec![json!(now)];
        params.extend(ids.iter().map(|id| json!(id)));
        let result = tx.query(&sql, &params)?;

        if result.row_count < ids.len() {
            return Err(ApiError::AlreadyTrashed(format!(
                "{} of {} records were already trashed or missing",
                ids.len() - result.row_count,
                ids.len()
            )));
        }

        let mut trashed = reorder_by_ids(result.rows, &ids)
            .into_iter()
            .map(|r| decode_record(&schema, r))
            .collect::<Vec<_>>();

        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Delete,
            false,
            &mut trashed,
            Some(existing.as_slice()),
        )?;
        tx.commit()?;
        Ok(trashed)
    }

    /// Batch revert: clears `trashed_at`. Only permitted when the request
    /// opted into trashed visibility; a non-trashed row aborts.
    pub async fn revert_all(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        reverts: Vec<Record>,
    ) -> ApiResult<Vec<Record>> {
        if !ctx.options.include_trashed {
            return Err(ApiError::validation(
                "revert requires the include_trashed option",
            ));
        }
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_write(ctx, &schema, Operation::Revert)?;
        if reverts.is_empty() {
            return Ok(Vec::new());
        }

        for revert in &reverts {
            for key in revert.0.keys() {
                if key != "id" && key != "trashed_at" {
                    return Err(ApiError::validation(format!(
                        "revert only accepts id and trashed_at, got '{}'",
                        key
                    )));
                }
            }
            if !matches!(revert.get("trashed_at"), Some(Value::Null)) {
                return Err(ApiError::validation("revert requires trashed_at: null"));
            }
        }
        let ids = require_ids(&reverts)?;

        let tx = ctx.db().transaction()?;
        let existing = self.fetch_for_revert(ctx, &tx, &schema, &ids)?;

        let now = now_string();
        let mut reverted: Vec<Record> = Vec::with_capacity(ids.len());
        for current in &existing {
            let mut next = current.clone();
            next.set("trashed_at", Value::Null);
            next.set("updated_at", json!(now));
            reverted.push(next);
        }

        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Revert,
            true,
            &mut reverted,
            Some(existing.as_slice()),
        )?;

        for id in &ids {
            let affected = tx.execute(
                &format!(
                    "UPDATE {} SET \"trashed_at\" = NULL, \"updated_at\" = ?1 \
                     WHERE \"id\" = ?2 AND \"trashed_at\" IS NOT NULL",
                    crate::filter::quote_ident(schema.table())?
                ),
                &[json!(now), json!(id)],
            )?;
            if affected != 1 {
                return Err(ApiError::validation(format!(
                    "record {} is not trashed",
                    id
                )));
            }
        }

        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Revert,
            false,
            &mut reverted,
            Some(existing.as_slice()),
        )?;
        tx.commit()?;
        Ok(reverted)
    }

    /// Restricted ACL update: only the `access_*` arrays may change;
    /// everything else in the payload is ignored with a warning.
    pub async fn access_all(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        changes: Vec<Record>,
    ) -> ApiResult<Vec<Record>> {
        if !ctx.sudo && !ctx.principal.access.can_administer() {
            return Err(ApiError::AccessDenied(
                "ACL changes require full access".into(),
            ));
        }
        let schema = self.schemas.to_schema(ctx, model_name)?;
        self.authorize_write(ctx, &schema, Operation::Access)?;
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let ids = require_ids(&changes)?;

        let tx = ctx.db().transaction()?;
        let existing = self.fetch_for_write(ctx, &tx, &schema, &ids)?;

        let now = now_string();
        let mut merged: Vec<Record> = Vec::with_capacity(changes.len());
        for (change, current) in changes.iter().zip(existing.iter()) {
            let mut next = current.clone();
            for (key, value) in change.0.iter() {
                if key == "id" {
                    continue;
                }
                if ACCESS_COLUMNS.contains(&key.as_str()) {
                    next.set(key, validate_acl_array(key, value)?);
                } else {
                    tracing::warn!(model = model_name, field = %key, "non-ACL field ignored in access update");
                }
            }
            next.set("updated_at", json!(now));
            merged.push(next);
        }

        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Access,
            true,
            &mut merged,
            Some(existing.as_slice()),
        )?;

        for record in &merged {
            let id = record
                .get("id")
                .cloned()
                .ok_or_else(|| ApiError::internal("access update lost id"))?;
            let affected = tx.execute(
                &format!(
                    "UPDATE {} SET \"access_read\" = ?1, \"access_edit\" = ?2, \
                     \"access_full\" = ?3, \"access_deny\" = ?4, \"updated_at\" = ?5 \
                     WHERE \"id\" = ?6",
                    crate::filter::quote_ident(schema.table())?
                ),
                &[
                    record.get("access_read").cloned().unwrap_or(json!([])),
                    record.get("access_edit").cloned().unwrap_or(json!([])),
                    record.get("access_full").cloned().unwrap_or(json!([])),
                    record.get("access_deny").cloned().unwrap_or(json!([])),
                    json!(now),
                    id,
                ],
            )?;
            if affected != 1 {
                return Err(ApiError::internal("access update affected no rows"));
            }
        }

        self.run_phase(
            ctx,
            &tx,
            &schema,
            Operation::Access,
            false,
            &mut merged,
            Some(existing.as_slice()),
        )?;
        tx.commit()?;
        Ok(merged)
    }

    /// Filtered ACL update.
    pub async fn access_any(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        filter: &Value,
        acl: &Record,
    ) -> ApiResult<Vec<Record>> {
        let hits = self.select_any(ctx, model_name, filter).await?;
        let changes: Vec<Record> = hits
            .iter()
            .filter_map(|hit| {
                hit.get("id").map(|id| {
                    let mut change = acl.clone();
                    change.set("id", id.clone());
                    change
                })
            })
            .collect();
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        self.access_all(ctx, model_name, changes).await
    }

    /// Single-record ACL update; missing record raises.
    pub async fn access_404(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        id: &str,
        acl: &Record,
    ) -> ApiResult<Record> {
        let mut change = acl.clone();
        change.set("id", json!(id));
        let mut updated = self.access_all(ctx, model_name, vec![change]).await?;
        updated
            .pop()
            .ok_or_else(|| ApiError::RecordNotFound(id.to_string()))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn select_with_doc(
        &self,
        ctx: &SystemContext,
        schema: &Schema,
        doc: &FilterDoc,
    ) -> ApiResult<Vec<Record>> {
        let q = to_select_sql(schema.table(), doc, 1)?;
        let result = ctx.db().query(&q.sql, &q.params)?;
        Ok(result
            .rows
            .into_iter()
            .map(|r| decode_record(schema, r))
            .filter(|r| self.acl_visible(ctx, r))
            .collect())
    }

    fn effective_doc(&self, ctx: &SystemContext, filter: &Value) -> ApiResult<FilterDoc> {
        let mut doc = parse_filter(filter)?;
        if doc.trashed.is_none() {
            doc.trashed = Some(ctx.options.trashed);
        }
        Ok(doc)
    }

    fn authorize_read(&self, ctx: &SystemContext) -> ApiResult<()> {
        if ctx.sudo || ctx.principal.access.can_read() {
            Ok(())
        } else {
            Err(ApiError::AccessDenied("read access denied".into()))
        }
    }

    fn authorize_write(
        &self,
        ctx: &SystemContext,
        schema: &Schema,
        operation: Operation,
    ) -> ApiResult<()> {
        if !ctx.sudo && !ctx.principal.access.can_write() {
            return Err(ApiError::AccessDenied(format!(
                "{} access denied",
                operation.as_str()
            )));
        }
        // Only the sudo surface may write system models; a root principal
        // on the public surface is still refused.
        if schema.is_system() && !ctx.sudo {
            return Err(ApiError::SystemModelProtected(
                schema.model.model_name.clone(),
            ));
        }
        if !ctx.is_elevated() {
            if schema.model.sudo {
                return Err(ApiError::AccessDenied(format!(
                    "model '{}' requires sudo",
                    schema.model.model_name
                )));
            }
            if schema.model.frozen {
                return Err(ApiError::AccessDenied(format!(
                    "model '{}' is frozen",
                    schema.model.model_name
                )));
            }
            if schema.model.immutable
                && matches!(
                    operation,
                    Operation::Update | Operation::Delete | Operation::Revert
                )
            {
                return Err(ApiError::AccessDenied(format!(
                    "model '{}' is immutable",
                    schema.model.model_name
                )));
            }
        }
        Ok(())
    }

    fn acl_visible(&self, ctx: &SystemContext, record: &Record) -> bool {
        if ctx.is_elevated() || ctx.principal.access.can_administer() {
            return true;
        }
        !record.acl_contains("access_deny", ctx.principal.user_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phase(
        &self,
        ctx: &SystemContext,
        tx: &Transaction<'_>,
        schema: &Schema,
        operation: Operation,
        pre: bool,
        records: &mut Vec<Record>,
        previous: Option<&[Record]>,
    ) -> ApiResult<()> {
        let (pre_phase, post_phase) = operation.phases();
        let phase = if pre { pre_phase } else { post_phase };
        let selected = self.observers.select(schema.table(), phase);
        for observer in selected {
            let mut event = ObserverEvent {
                operation,
                schema,
                records: &mut *records,
                previous,
            };
            observer.run(ctx, tx, &mut event).map_err(|e| {
                tracing::warn!(
                    observer = observer.name(),
                    model = schema.table(),
                    error = %e,
                    "observer aborted batch"
                );
                e
            })?;
        }
        Ok(())
    }

    /// Fetch rows for an update-style write, in id order. Missing rows,
    /// tombstones, trashed rows, and hidden rows abort.
    fn fetch_for_write(
        &self,
        ctx: &SystemContext,
        tx: &Transaction<'_>,
        schema: &Schema,
        ids: &[String],
    ) -> ApiResult<Vec<Record>> {
        let rows = self.fetch_raw(tx, schema, ids)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = rows
                .iter()
                .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
                .ok_or_else(|| ApiError::RecordNotFound(id.clone()))?;
            if !self.acl_visible(ctx, row) {
                return Err(ApiError::RecordNotFound(id.clone()));
            }
            if row.is_deleted() {
                return Err(ApiError::DeletedRecord(id.clone()));
            }
            if row.is_trashed() {
                return Err(ApiError::TrashedRecord(id.clone()));
            }
            out.push(row.clone());
        }
        Ok(out)
    }

    /// Fetch rows for a delete: must exist, must not be tombstoned.
    fn fetch_for_delete(
        &self,
        ctx: &SystemContext,
        tx: &Transaction<'_>,
        schema: &Schema,
        ids: &[String],
    ) -> ApiResult<Vec<Record>> {
        let rows = self.fetch_raw(tx, schema, ids)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = rows
                .iter()
                .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
                .ok_or_else(|| ApiError::RecordNotFound(id.clone()))?;
            if !self.acl_visible(ctx, row) {
                return Err(ApiError::RecordNotFound(id.clone()));
            }
            if row.is_deleted() {
                return Err(ApiError::DeletedRecord(id.clone()));
            }
            out.push(row.clone());
        }
        Ok(out)
    }

    /// Fetch rows for a revert: must exist, must be trashed.
    fn fetch_for_revert(
        &self,
        ctx: &SystemContext,
        tx: &Transaction<'_>,
        schema: &Schema,
        ids: &[String],
    ) -> ApiResult<Vec<Record>> {
        let rows = self.fetch_raw(tx, schema, ids)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = rows
                .iter()
                .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
                .ok_or_else(|| ApiError::RecordNotFound(id.clone()))?;
            if !self.acl_visible(ctx, row) {
                return Err(ApiError::RecordNotFound(id.clone()));
            }
            if row.is_deleted() {
                return Err(ApiError::DeletedRecord(id.clone()));
            }
            if !row.is_trashed() {
                return Err(ApiError::validation(format!(
                    "record {} is not trashed",
                    id
                )));
            }
            out.push(row.clone());
        }
        Ok(out)
    }

    fn fetch_raw(
        &self,
        tx: &Transaction<'_>,
        schema: &Schema,
        ids: &[String],
    ) -> ApiResult<Vec<Record>> {
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT * FROM {} WHERE \"id\" IN ({})",
            crate::filter::quote_ident(schema.table())?,
            placeholders.join(", ")
        );
        let params: Vec<Value> = ids.iter().map(|id| json!(id)).collect();
        let result = tx.query(&sql, &params)?;
        Ok(result
            .rows
            .into_iter()
            .map(|r| decode_record(schema, r))
            .collect())
    }
}

// ----------------------------------------------------------------------
// Record shaping helpers
// ----------------------------------------------------------------------

/// Assign base attributes to a record being created.
fn prepare_new_record(record: &mut Record, now: &str) -> ApiResult<()> {
    let id = match record.get("id") {
        Some(Value::String(s)) => Uuid::parse_str(s)
            .map_err(|_| ApiError::validation(format!("invalid record id '{}'", s)))?,
        Some(_) => return Err(ApiError::validation("record id must be a uuid string")),
        None => Uuid::new_v4(),
    };
    record.set("id", json!(id.to_string()));
    record.set("created_at", json!(now));
    record.set("updated_at", json!(now));
    record.set("trashed_at", Value::Null);
    record.set("deleted_at", Value::Null);
    for column in ACCESS_COLUMNS {
        let value = record.get(column).cloned().unwrap_or(json!([]));
        record.set(column, validate_acl_array(column, &value)?);
    }
    Ok(())
}

/// ACL arrays are lists of user-id strings.
fn validate_acl_array(column: &str, value: &Value) -> ApiResult<Value> {
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::validation(format!("{} must be an array", column)))?;
    for item in items {
        let s = item
            .as_str()
            .ok_or_else(|| ApiError::validation(format!("{} entries must be user ids", column)))?;
        Uuid::parse_str(s)
            .map_err(|_| ApiError::validation(format!("{} entry '{}' is not a uuid", column, s)))?;
    }
    Ok(value.clone())
}

fn require_ids(records: &[Record]) -> ApiResult<Vec<String>> {
    records
        .iter()
        .map(|r| {
            r.get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| ApiError::validation("every record in the batch must carry an id"))
        })
        .collect()
}

fn build_insert_sql(schema: &Schema) -> String {
    let columns = schema.columns();
    let column_sql: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        schema.table(),
        column_sql.join(", "),
        placeholders.join(", ")
    )
}

fn update_row(
    tx: &Transaction<'_>,
    schema: &Schema,
    field_columns: &[String],
    record: &Record,
    now: &str,
) -> ApiResult<()> {
    let mut sets: Vec<String> = Vec::with_capacity(field_columns.len() + 1);
    let mut params: Vec<Value> = Vec::with_capacity(field_columns.len() + 2);
    for (i, column) in field_columns.iter().enumerate() {
        sets.push(format!("\"{}\" = ?{}", column, i + 1));
        params.push(encode_column(
            schema,
            column,
            record.get(column).cloned().unwrap_or(Value::Null),
        ));
    }
    let updated_at_idx = field_columns.len() + 1;
    let id_idx = field_columns.len() + 2;
    sets.push(format!("\"updated_at\" = ?{}", updated_at_idx));
    params.push(json!(now));
    params.push(
        record
            .get("id")
            .cloned()
            .ok_or_else(|| ApiError::internal("update lost record id"))?,
    );

    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"id\" = ?{}",
        schema.table(),
        sets.join(", "),
        id_idx
    );
    let affected = tx.execute(&sql, &params)?;
    if affected != 1 {
        return Err(ApiError::internal(format!(
            "update affected {} rows",
            affected
        )));
    }
    Ok(())
}

/// Encode one column for storage. `jsonb` values are stored as JSON text
/// whatever their shape, so scalars round-trip unambiguously; `binary`
/// payloads bind as raw bytes via the adapter's blob wrapper; everything
/// else relies on the adapter's dynamic conversion.
fn encode_column(schema: &Schema, column: &str, value: Value) -> Value {
    if value.is_null() {
        return value;
    }
    if let Some(field) = schema.field(column) {
        match field.ty() {
            Ok(crate::schema::FieldType::Jsonb) => return Value::String(value.to_string()),
            Ok(crate::schema::FieldType::Binary) => {
                if let Value::String(payload) = &value {
                    return crate::adapter::blob_param(payload);
                }
            }
            _ => {}
        }
    }
    value
}

/// Decode a storage row using the schema: 0/1 to booleans, JSON text to
/// values for jsonb/array columns and the ACL arrays.
pub fn decode_record(schema: &Schema, mut record: Record) -> Record {
    for column in ACCESS_COLUMNS {
        if let Some(Value::String(s)) = record.get(column) {
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                record.set(column, parsed);
            }
        }
    }
    for field in &schema.fields {
        let Ok(ty) = field.ty() else { continue };
        let Some(value) = record.get(&field.field_name).cloned() else {
            continue;
        };
        match (&ty, &value) {
            (crate::schema::FieldType::Boolean, Value::Number(n)) => {
                record.set(&field.field_name, json!(n.as_i64() == Some(1)));
            }
            (crate::schema::FieldType::Jsonb, Value::String(s))
            | (crate::schema::FieldType::Array(_), Value::String(s)) => {
                if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                    record.set(&field.field_name, parsed);
                }
            }
            _ => {}
        }
    }
    record
}

fn reorder_by_ids(rows: Vec<Record>, ids: &[String]) -> Vec<Record> {
    let mut out = Vec::with_capacity(rows.len());
    let mut remaining = rows;
    for id in ids {
        if let Some(pos) = remaining
            .iter()
            .position(|r| r.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
        {
            out.push(remaining.remove(pos));
        }
    }
    out.extend(remaining);
    out
}

fn decode_json_text(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => serde_json::from_str(s).ok(),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.clone()),
    }
}

fn now_string() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
