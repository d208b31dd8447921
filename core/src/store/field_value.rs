//! Store methods for raw monthly field values.

use super::{month_column, IncentiveStore};
use crate::{
    error::EngineResult,
    field::{FieldValue, FieldValues},
    types::{FacilityId, ReportingMonth},
};
use rusqlite::{params, OptionalExtension};

impl IncentiveStore {
    /// Write path for submission/import collaborators. The engine itself
    /// never calls this.
    pub fn upsert_field_value(
        &self,
        field_id: &str,
        facility_id: &str,
        month: ReportingMonth,
        value: &FieldValue,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO field_value (field_id, facility_id, month, value_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(field_id, facility_id, month) DO UPDATE SET
                value_json = excluded.value_json",
            params![field_id, facility_id, month.to_string(), serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    pub fn delete_field_value(
        &self,
        field_id: &str,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<()> {
        self.conn.execute(
            "DELETE FROM field_value WHERE field_id = ?1 AND facility_id = ?2 AND month = ?3",
            params![field_id, facility_id, month.to_string()],
        )?;
        Ok(())
    }

    pub fn field_value(
        &self,
        field_id: &str,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<Option<FieldValue>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM field_value
                 WHERE field_id = ?1 AND facility_id = ?2 AND month = ?3",
                params![field_id, facility_id, month.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Every field submitted by a facility for a month.
    pub fn field_values_for(
        &self,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<FieldValues> {
        let mut stmt = self.conn.prepare(
            "SELECT field_id, value_json FROM field_value
             WHERE facility_id = ?1 AND month = ?2",
        )?;
        let rows = stmt
            .query_map(params![facility_id, month.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut values = FieldValues::with_capacity(rows.len());
        for (field_id, json) in rows {
            values.insert(field_id, serde_json::from_str(&json)?);
        }
        Ok(values)
    }

    /// Distinct (facility, month) pairs with any submitted data, in order.
    pub fn submitted_keys(&self) -> EngineResult<Vec<(FacilityId, ReportingMonth)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT facility_id, month FROM field_value
             ORDER BY facility_id ASC, month ASC",
        )?;
        let keys = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, month_column(1, row.get(1)?)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}
