//! # Dynamic Model Admin
//!
//! Orchestration behind the describe surface: model and field metadata
//! writes flow through the record pipeline under an elevated context (the
//! `models`/`fields` rows are themselves system records), then the DDL
//! that materialises the change runs against the tenant namespace.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::context::SystemContext;
use crate::core::error::{ApiError, ApiResult};
use crate::core::record::Record;
use crate::pipeline::RecordPipeline;
use crate::schema::{ddl, validate_model_name, FieldDef};

/// Model/field administration service.
pub struct ModelAdmin {
    pipeline: Arc<RecordPipeline>,
    allow_model_name_reuse: bool,
}

impl ModelAdmin {
    pub fn new(pipeline: Arc<RecordPipeline>, allow_model_name_reuse: bool) -> Self {
        Self {
            pipeline,
            allow_model_name_reuse,
        }
    }

    /// Create a model: metadata rows, backing table, `pending → active`.
    /// The body may carry a `fields` map of field specs.
    pub async fn create_model(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        body: &Value,
    ) -> ApiResult<Record> {
        self.authorize_admin(ctx)?;
        validate_model_name(model_name)?;
        let obj = body
            .as_object()
            .cloned()
            .unwrap_or_default();

        self.check_name_available(ctx, model_name)?;

        let sudo = ctx.as_sudo();
        let model_record = Record::from_value(json!({
            "model_name": model_name,
            "status": "pending",
            "sudo": bool_of(obj.get("sudo")),
            "frozen": bool_of(obj.get("frozen")),
            "immutable": bool_of(obj.get("immutable")),
            "external": bool_of(obj.get("external")),
            "description": obj.get("description").cloned().unwrap_or(Value::Null),
        }))
        .expect("literal object");

        let created = self
            .pipeline
            .create_all(&sudo, "models", vec![model_record])
            .await?;
        let model_row = created.into_iter().next().ok_or_else(|| {
            ApiError::internal("model create returned no record")
        })?;

        let result = self
            .create_model_fields_and_table(&sudo, model_name, obj.get("fields"))
            .await;
        if let Err(e) = result {
            self.discard_model_metadata(&sudo, model_name);
            return Err(e);
        }

        let model_id = model_row
            .get("id")
            .cloned()
            .ok_or_else(|| ApiError::internal("model row without id"))?;
        let activated = self
            .pipeline
            .update_all(
                &sudo,
                "models",
                vec![Record::from_value(json!({"id": model_id, "status": "active"}))
                    .expect("literal object")],
            )
            .await?;
        activated
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal("model activation returned no record"))
    }

    /// Read model metadata (fields excluded).
    pub async fn get_model(&self, ctx: &SystemContext, model_name: &str) -> ApiResult<Record> {
        self.pipeline
            .select_404(
                ctx,
                "models",
                &json!({"where": {"model_name": model_name}}),
                Some(model_name),
            )
            .await
            .map_err(|e| match e {
                ApiError::RecordNotFound(m) => ApiError::ModelNotFound(m),
                other => other,
            })
    }

    /// Update model metadata: protection flags and description only.
    pub async fn update_model(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        body: &Value,
    ) -> ApiResult<Record> {
        self.authorize_admin(ctx)?;
        let obj = body
            .as_object()
            .ok_or_else(|| ApiError::InvalidBody("model update must be an object".into()))?;
        for key in obj.keys() {
            if !matches!(
                key.as_str(),
                "sudo" | "frozen" | "immutable" | "external" | "description"
            ) {
                return Err(ApiError::validation(format!(
                    "model attribute '{}' cannot be updated",
                    key
                )));
            }
        }

        let schema = self.pipeline.schemas().to_schema(ctx, model_name)?;
        if schema.is_system() && !ctx.sudo {
            return Err(ApiError::SystemModelProtected(model_name.to_string()));
        }
        let current = self.get_model(ctx, model_name).await?;
        let id = current
            .get("id")
            .cloned()
            .ok_or_else(|| ApiError::internal("model row without id"))?;

        let mut update = Record::new();
        update.set("id", id);
        for (key, value) in obj {
            update.set(key, value.clone());
        }

        let sudo = ctx.as_sudo();
        let updated = self.pipeline.update_all(&sudo, "models", vec![update]).await?;
        updated
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal("model update returned no record"))
    }

    /// Soft-delete a model: drops the backing table, keeps the metadata.
    /// The name stays unusable while the metadata remains.
    pub async fn delete_model(&self, ctx: &SystemContext, model_name: &str) -> ApiResult<Record> {
        self.authorize_admin(ctx)?;
        let schema = self.pipeline.schemas().to_schema(ctx, model_name)?;
        if schema.is_system() && !ctx.sudo {
            return Err(ApiError::SystemModelProtected(model_name.to_string()));
        }

        let current = self.get_model(ctx, model_name).await?;
        let model_id = current
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::internal("model row without id"))?
            .to_string();

        let sudo = ctx.as_sudo();
        let field_rows = self
            .pipeline
            .select_any(&sudo, "fields", &json!({"where": {"model_name": model_name}}))
            .await?;
        let field_ids: Vec<String> = field_rows
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_str()).map(String::from))
            .collect();

        let trashed = self
            .pipeline
            .delete_all(&sudo, "models", vec![model_id])
            .await?;
        if !field_ids.is_empty() {
            self.pipeline.delete_all(&sudo, "fields", field_ids).await?;
        }

        ctx.db().execute(&ddl::drop_table_sql(model_name)?, &[])?;
        self.pipeline.schemas().invalidate(&ctx.tenant.name, model_name);

        trashed
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal("model delete returned no record"))
    }

    /// Create a field and ALTER the backing table.
    pub async fn create_field(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        field_name: &str,
        body: &Value,
    ) -> ApiResult<Record> {
        self.authorize_admin(ctx)?;
        let schema = self.pipeline.schemas().to_schema(ctx, model_name)?;
        if schema.is_system() && !ctx.sudo {
            return Err(ApiError::SystemModelProtected(model_name.to_string()));
        }
        if schema.field(field_name).is_some() {
            return Err(ApiError::validation(format!(
                "field '{}' already exists on '{}'",
                field_name, model_name
            )));
        }

        let mut record = Record::from_value(body.clone())
            .ok_or_else(|| ApiError::InvalidBody("field spec must be an object".into()))?;
        record.set("model_name", json!(model_name));
        record.set("field_name", json!(field_name));
        // Shape check up front, before the metadata row lands.
        let def = FieldDef::from_record(&record)?;

        let sudo = ctx.as_sudo();
        let created = self
            .pipeline
            .create_all(&sudo, "fields", vec![record])
            .await?;
        let field_row = created
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal("field create returned no record"))?;

        let table_empty = self.table_row_count(ctx, model_name)? == 0;
        let alter = ddl::add_column_sql(model_name, &def, table_empty)?;
        if let Err(e) = ctx.db().execute(&alter, &[]) {
            self.discard_field_metadata(&sudo, model_name, field_name);
            return Err(e);
        }
        if def.index || def.unique {
            ctx.db()
                .execute(&ddl::create_index_sql(model_name, &def)?, &[])?;
        }

        self.pipeline.schemas().invalidate(&ctx.tenant.name, model_name);
        Ok(field_row)
    }

    /// Read one field definition.
    pub async fn get_field(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        field_name: &str,
    ) -> ApiResult<Record> {
        self.pipeline
            .select_404(
                ctx,
                "fields",
                &json!({"where": {"model_name": model_name, "field_name": field_name}}),
                Some(&format!("{}.{}", model_name, field_name)),
            )
            .await
            .map_err(|e| match e {
                ApiError::RecordNotFound(m) => ApiError::FieldNotFound(m),
                other => other,
            })
    }

    /// Update a field. Metadata-only edits pass; type changes must widen
    /// and the column must hold no values. An empty body is a no-op.
    pub async fn update_field(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        field_name: &str,
        body: &Value,
    ) -> ApiResult<Record> {
        self.authorize_admin(ctx)?;
        let obj = body
            .as_object()
            .ok_or_else(|| ApiError::InvalidBody("field update must be an object".into()))?;

        let current = self.get_field(ctx, model_name, field_name).await?;
        if obj.is_empty() {
            tracing::debug!(
                model = model_name,
                field = field_name,
                "empty field update treated as no-op"
            );
            return Ok(current);
        }
        if obj.contains_key("model_name") || obj.contains_key("field_name") {
            return Err(ApiError::validation(
                "field names cannot be changed through update",
            ));
        }

        let schema = self.pipeline.schemas().to_schema(ctx, model_name)?;
        if schema.is_system() && !ctx.sudo {
            return Err(ApiError::SystemModelProtected(model_name.to_string()));
        }
        let old_def = schema
            .field(field_name)
            .cloned()
            .ok_or_else(|| ApiError::FieldNotFound(field_name.to_string()))?;

        let mut merged = current.clone();
        for (key, value) in obj {
            merged.set(key, value.clone());
        }
        let new_def = FieldDef::from_record(&merged)?;
        let column_has_values = self.column_value_count(ctx, model_name, field_name)? > 0;
        ddl::validate_field_change(&old_def, &new_def, column_has_values)?;

        let id = current
            .get("id")
            .cloned()
            .ok_or_else(|| ApiError::internal("field row without id"))?;
        let mut update = Record::from_value(Value::Object(obj.clone())).expect("object body");
        update.set("id", id);

        let sudo = ctx.as_sudo();
        let updated = self
            .pipeline
            .update_all(&sudo, "fields", vec![update])
            .await?;
        updated
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal("field update returned no record"))
    }

    /// Drop a field: soft-delete the metadata row and DROP COLUMN.
    pub async fn delete_field(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        field_name: &str,
    ) -> ApiResult<Record> {
        self.authorize_admin(ctx)?;
        let schema = self.pipeline.schemas().to_schema(ctx, model_name)?;
        if schema.is_system() && !ctx.sudo {
            return Err(ApiError::SystemModelProtected(model_name.to_string()));
        }

        let current = self.get_field(ctx, model_name, field_name).await?;
        let id = current
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::internal("field row without id"))?
            .to_string();

        if !self.column_exists(ctx, model_name, field_name)? {
            return Err(ApiError::ColumnNotFound(format!(
                "{}.{}",
                model_name, field_name
            )));
        }

        let sudo = ctx.as_sudo();
        let trashed = self.pipeline.delete_all(&sudo, "fields", vec![id]).await?;
        ctx.db()
            .execute(&ddl::drop_index_sql(model_name, field_name)?, &[])?;
        ctx.db()
            .execute(&ddl::drop_column_sql(model_name, field_name)?, &[])?;
        self.pipeline.schemas().invalidate(&ctx.tenant.name, model_name);

        trashed
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal("field delete returned no record"))
    }

    // ------------------------------------------------------------------

    fn authorize_admin(&self, ctx: &SystemContext) -> ApiResult<()> {
        if ctx.sudo || ctx.principal.access.can_administer() {
            Ok(())
        } else {
            Err(ApiError::AccessDenied(
                "model administration requires full access".into(),
            ))
        }
    }

    /// A model name is taken while any metadata row carries it, active or
    /// trashed. The reuse flag clears trashed metadata instead.
    fn check_name_available(&self, ctx: &SystemContext, model_name: &str) -> ApiResult<()> {
        let rows = ctx.db().query(
            "SELECT \"id\", \"trashed_at\" FROM \"models\" WHERE \"model_name\" = ?1",
            &[json!(model_name)],
        )?;
        let Some(row) = rows.rows.first() else {
            return Ok(());
        };
        if !row.is_trashed() {
            return Err(ApiError::validation(format!(
                "model '{}' already exists",
                model_name
            )));
        }
        if !self.allow_model_name_reuse {
            return Err(ApiError::validation(format!(
                "model name '{}' belongs to a deleted model and is not reusable",
                model_name
            )));
        }
        tracing::warn!(
            model = model_name,
            "reusing soft-deleted model name; clearing old metadata"
        );
        ctx.db().execute(
            "DELETE FROM \"models\" WHERE \"model_name\" = ?1 AND \"trashed_at\" IS NOT NULL",
            &[json!(model_name)],
        )?;
        ctx.db().execute(
            "DELETE FROM \"fields\" WHERE \"model_name\" = ?1 AND \"trashed_at\" IS NOT NULL",
            &[json!(model_name)],
        )?;
        Ok(())
    }

    async fn create_model_fields_and_table(
        &self,
        sudo: &SystemContext,
        model_name: &str,
        fields: Option<&Value>,
    ) -> ApiResult<()> {
        let mut field_records = Vec::new();
        if let Some(fields) = fields {
            let map = fields.as_object().ok_or_else(|| {
                ApiError::validation("fields must be an object of field specs")
            })?;
            for (field_name, spec) in map {
                let mut record = Record::from_value(spec.clone()).ok_or_else(|| {
                    ApiError::validation(format!("field spec '{}' must be an object", field_name))
                })?;
                record.set("model_name", json!(model_name));
                record.set("field_name", json!(field_name));
                FieldDef::from_record(&record)?;
                field_records.push(record);
            }
        }
        if !field_records.is_empty() {
            self.pipeline
                .create_all(sudo, "fields", field_records)
                .await?;
        }

        let schema = self.pipeline.schemas().load(sudo, model_name)?;
        sudo.db().execute(&ddl::create_table_sql(&schema)?, &[])?;
        for field in &schema.fields {
            if field.index || field.unique {
                sudo.db()
                    .execute(&ddl::create_index_sql(model_name, field)?, &[])?;
            }
        }
        Ok(())
    }

    /// Compensation for a failed model create: hard-delete the metadata
    /// so the name does not leak into the not-reusable set.
    fn discard_model_metadata(&self, sudo: &SystemContext, model_name: &str) {
        let db = sudo.db();
        let _ = db.execute(
            "DELETE FROM \"models\" WHERE \"model_name\" = ?1",
            &[json!(model_name)],
        );
        let _ = db.execute(
            "DELETE FROM \"fields\" WHERE \"model_name\" = ?1",
            &[json!(model_name)],
        );
        let _ = db.execute(&ddl::drop_table_sql(model_name).unwrap_or_default(), &[]);
        self.pipeline
            .schemas()
            .invalidate(&sudo.tenant.name, model_name);
    }

    fn discard_field_metadata(&self, sudo: &SystemContext, model_name: &str, field_name: &str) {
        let _ = sudo.db().execute(
            "DELETE FROM \"fields\" WHERE \"model_name\" = ?1 AND \"field_name\" = ?2",
            &[json!(model_name), json!(field_name)],
        );
        self.pipeline
            .schemas()
            .invalidate(&sudo.tenant.name, model_name);
    }

    fn table_row_count(&self, ctx: &SystemContext, model_name: &str) -> ApiResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS \"count\" FROM {}",
            crate::filter::quote_ident(model_name)?
        );
        let result = ctx.db().query(&sql, &[])?;
        Ok(result
            .rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    fn column_value_count(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        field_name: &str,
    ) -> ApiResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS \"count\" FROM {} WHERE {} IS NOT NULL",
            crate::filter::quote_ident(model_name)?,
            crate::filter::quote_ident(field_name)?
        );
        let result = ctx.db().query(&sql, &[])?;
        Ok(result
            .rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    fn column_exists(
        &self,
        ctx: &SystemContext,
        model_name: &str,
        field_name: &str,
    ) -> ApiResult<bool> {
        crate::filter::validate_identifier(model_name)?;
        let result = ctx.db().query(
            "SELECT \"name\" FROM pragma_table_info(?1) WHERE \"name\" = ?2",
            &[json!(model_name), json!(field_name)],
        )?;
        Ok(result.row_count > 0)
    }
}

fn bool_of(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true))) || matches!(value, Some(Value::Number(n)) if n.as_i64() == Some(1))
}
