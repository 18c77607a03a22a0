//! PostgreSQL sink: temp table, binary `COPY`, `INSERT ... ON CONFLICT`.

use std::{error::Error, fmt};

use log::{debug, info, warn};
use postgres::{
    Client, NoTls,
    binary_copy::BinaryCopyInWriter,
    types::{IsNull, ToSql, Type, accepts, private::BytesMut, to_sql_checked},
};

use crate::{
    batch::TypedBatch,
    data::Value,
    error::LoadError,
    schema::{FieldType, TableSchema},
};

use super::{LoadReport, Sink, check_conflict_keys, sql};

pub fn pg_type(datatype: FieldType) -> Type {
    match datatype {
        FieldType::Integer => Type::INT8,
        FieldType::Float => Type::FLOAT8,
        FieldType::Boolean => Type::BOOL,
        FieldType::Timestamp => Type::TIMESTAMP,
        FieldType::Text => Type::TEXT,
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>>
    where
        Self: Sized,
    {
        match self {
            Value::Integer(value) => match *ty {
                Type::INT2 => i16::try_from(*value)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*value)?.to_sql(ty, out),
                _ => value.to_sql(ty, out),
            },
            Value::Float(value) => value.to_sql(ty, out),
            Value::Boolean(value) => value.to_sql(ty, out),
            Value::Timestamp(value) => value.to_sql(ty, out),
            Value::Text(value) => value.to_sql(ty, out),
        }
    }

    accepts!(BOOL, INT2, INT4, INT8, FLOAT8, TIMESTAMP, TEXT, VARCHAR);
    to_sql_checked!();
}

pub struct PgSink {
    client: Client,
}

impl PgSink {
    pub fn connect(url: &str) -> Result<Self, LoadError> {
        let client = Client::connect(url, NoTls).map_err(LoadError::Connect)?;
        Ok(PgSink { client })
    }
}

/// Row count read after commit. The batch is already durable, so a failed
/// count is only logged.
fn committed_rows<E: fmt::Display>(table: &str, count: Result<i64, E>) -> Option<u64> {
    match count {
        Ok(count) => {
            info!("{table}: table now holds {count} row(s)");
            u64::try_from(count).ok()
        }
        Err(err) => {
            warn!("{table}: committed, but counting rows failed: {err}");
            None
        }
    }
}

impl Sink for PgSink {
    fn upsert(&mut self, schema: &TableSchema, batch: &TypedBatch) -> Result<LoadReport, LoadError> {
        check_conflict_keys(schema, batch)?;
        let table = &schema.name;
        let rows = batch.len();
        let staging = sql::staging_table_name(table);
        let stage_err = |source| LoadError::Stage {
            table: table.clone(),
            rows,
            source,
        };
        let merge_err = |source| LoadError::Merge {
            table: table.clone(),
            rows,
            source,
        };

        let mut tx = self.client.transaction().map_err(stage_err)?;

        let ddl = sql::create_staging(&staging, &batch.fields, &batch.types);
        debug!("{ddl}");
        tx.batch_execute(&ddl).map_err(stage_err)?;

        let copy = sql::copy_into_staging(&staging, &batch.fields);
        debug!("{copy}");
        let types: Vec<Type> = batch.types.iter().copied().map(pg_type).collect();
        let sink = tx.copy_in(copy.as_str()).map_err(stage_err)?;
        let mut writer = BinaryCopyInWriter::new(sink, &types);
        for row in &batch.rows {
            let params: Vec<&(dyn ToSql + Sync)> =
                row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            writer.write(&params).map_err(stage_err)?;
        }
        let staged = writer.finish().map_err(stage_err)?;

        let merge = sql::merge_from_staging(schema, &staging, &batch.fields);
        debug!("{merge}");
        let merged = tx.execute(merge.as_str(), &[]).map_err(merge_err)?;

        tx.commit().map_err(|source| LoadError::Commit {
            table: table.clone(),
            rows,
            source,
        })?;

        let count = self
            .client
            .query_one(sql::count_rows(table).as_str(), &[])
            .map(|row| row.get::<_, i64>(0));
        let table_rows = committed_rows(table, count);
        info!("{table}: merged {merged} of {staged} staged row(s)");

        Ok(LoadReport {
            table: table.clone(),
            staged: rows,
            merged,
            table_rows,
        })
    }
}
