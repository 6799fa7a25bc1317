//! SQLite implementation of the storage traits.
//!
//! [`SqliteStore`] persists edges and the emission ledger in a SQLite
//! database with WAL mode, a transaction around every write, and automatic
//! schema migrations. Quantities are stored as fixed-point INTEGER columns;
//! node and edge kinds as lowercase TEXT; timestamps as RFC 3339 TEXT.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use cbam_core::edge::{Edge, EdgeKind, EdgeUpdate, NewEdge};
use cbam_core::emission::{
    validate_direct_emission, ProcessEmission, ProductAmounts, ProductEmission,
};
use cbam_core::id::{EdgeId, ProcessId, ProductId};
use cbam_core::node::{NodeKind, NodeRef};
use cbam_core::quantity::Quantity;

use crate::error::StorageError;
use crate::traits::{EdgeStore, ProcessEmissionStore, ProductEmissionStore};
use crate::types::EdgeFilter;

const EDGE_COLUMNS: &str =
    "id, source_kind, source_id, target_kind, target_id, edge_kind, created_at, updated_at";

const PROCESS_COLUMNS: &str = "process_id, direct_emission, cumulative_emission";

const PRODUCT_COLUMNS: &str = "product_id, direct_emission, allocated_emission, \
     produced_amount, sold_amount, eu_sold_amount";

/// SQLite-backed edge store and emission ledger.
///
/// Every write operation is wrapped in a transaction for atomicity.
pub struct SqliteStore {
    conn: Connection,
}

/// An edges row before its text columns are decoded.
struct EdgeRow {
    id: i64,
    source_kind: String,
    source_id: i64,
    target_kind: String,
    target_id: i64,
    edge_kind: String,
    created_at: String,
    updated_at: String,
}

impl EdgeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(EdgeRow {
            id: row.get(0)?,
            source_kind: row.get(1)?,
            source_id: row.get(2)?,
            target_kind: row.get(3)?,
            target_id: row.get(4)?,
            edge_kind: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_edge(self) -> Result<Edge, StorageError> {
        let source = NodeRef {
            kind: self.source_kind.parse::<NodeKind>()?,
            id: self.source_id,
        };
        let target = NodeRef {
            kind: self.target_kind.parse::<NodeKind>()?,
            id: self.target_id,
        };
        Ok(Edge {
            id: EdgeId(self.id),
            source,
            target,
            kind: self.edge_kind.parse::<EdgeKind>()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::IntegrityError {
            reason: format!("bad timestamp '{value}': {e}"),
        })
}

fn process_from_row(row: &Row<'_>) -> rusqlite::Result<ProcessEmission> {
    Ok(ProcessEmission {
        process_id: ProcessId(row.get(0)?),
        direct_emission: Quantity(row.get(1)?),
        cumulative_emission: Quantity(row.get(2)?),
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<ProductEmission> {
    Ok(ProductEmission {
        product_id: ProductId(row.get(0)?),
        direct_emission: Quantity(row.get(1)?),
        allocated_emission: Quantity(row.get(2)?),
        produced_amount: Quantity(row.get(3)?),
        sold_amount: Quantity(row.get(4)?),
        eu_sold_amount: Quantity(row.get(5)?),
    })
}

fn query_edge(conn: &Connection, id: EdgeId) -> Result<Edge, StorageError> {
    let row = conn
        .query_row(
            &format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = ?1"),
            params![id.0],
            EdgeRow::from_row,
        )
        .optional()?
        .ok_or(StorageError::EdgeNotFound(id))?;
    row.into_edge()
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }
}

impl EdgeStore for SqliteStore {
    fn create_edge(&mut self, edge: NewEdge) -> Result<Edge, StorageError> {
        edge.kind.validate_endpoints(edge.source, edge.target)?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO edges (source_kind, source_id, target_kind, target_id, edge_kind, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                edge.source.kind.as_str(),
                edge.source.id,
                edge.target.kind.as_str(),
                edge.target.id,
                edge.kind.as_str(),
                now,
            ],
        )?;
        let id = EdgeId(tx.last_insert_rowid());
        let stored = query_edge(&tx, id)?;
        tx.commit()?;

        tracing::debug!(edge = %id, kind = %stored.kind, "edge created");
        Ok(stored)
    }

    fn get_edge(&self, id: EdgeId) -> Result<Edge, StorageError> {
        query_edge(&self.conn, id)
    }

    fn update_edge(&mut self, id: EdgeId, update: EdgeUpdate) -> Result<Edge, StorageError> {
        let tx = self.conn.transaction()?;
        let current = query_edge(&tx, id)?;
        let updated = update.apply(&current, Utc::now())?;
        tx.execute(
            "UPDATE edges
             SET source_kind = ?2, source_id = ?3, target_kind = ?4, target_id = ?5,
                 edge_kind = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id.0,
                updated.source.kind.as_str(),
                updated.source.id,
                updated.target.kind.as_str(),
                updated.target.id,
                updated.kind.as_str(),
                updated.updated_at.to_rfc3339(),
            ],
        )?;
        let stored = query_edge(&tx, id)?;
        tx.commit()?;
        Ok(stored)
    }

    fn delete_edge(&mut self, id: EdgeId) -> Result<Edge, StorageError> {
        let tx = self.conn.transaction()?;
        let current = query_edge(&tx, id)?;
        tx.execute("DELETE FROM edges WHERE id = ?1", params![id.0])?;
        tx.commit()?;

        tracing::debug!(edge = %id, "edge deleted");
        Ok(current)
    }

    fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, StorageError> {
        let kind = filter.kind.map(|k| k.as_str());
        let split = |n: Option<NodeRef>| (n.map(|n| n.kind.as_str()), n.map(|n| n.id));
        let (source_kind, source_id) = split(filter.source);
        let (target_kind, target_id) = split(filter.target);
        let (node_kind, node_id) = split(filter.node);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges
             WHERE (?1 IS NULL OR edge_kind = ?1)
               AND (?2 IS NULL OR (source_kind = ?2 AND source_id = ?3))
               AND (?4 IS NULL OR (target_kind = ?4 AND target_id = ?5))
               AND (?6 IS NULL
                    OR (source_kind = ?6 AND source_id = ?7)
                    OR (target_kind = ?6 AND target_id = ?7))
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(
                params![kind, source_kind, source_id, target_kind, target_id, node_kind, node_id],
                EdgeRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(EdgeRow::into_edge).collect()
    }
}

impl ProcessEmissionStore for SqliteStore {
    fn get_process_emission(&self, id: ProcessId) -> Result<ProcessEmission, StorageError> {
        self.conn
            .query_row(
                &format!("SELECT {PROCESS_COLUMNS} FROM process_emissions WHERE process_id = ?1"),
                params![id.0],
                process_from_row,
            )
            .optional()?
            .ok_or(StorageError::ProcessNotFound(id))
    }

    fn set_process_direct(
        &mut self,
        id: ProcessId,
        direct: Quantity,
    ) -> Result<ProcessEmission, StorageError> {
        validate_direct_emission(direct)?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO process_emissions (process_id, direct_emission, cumulative_emission, updated_at)
             VALUES (?1, ?2, ?2, ?3)
             ON CONFLICT (process_id) DO UPDATE
             SET direct_emission = excluded.direct_emission, updated_at = excluded.updated_at",
            params![id.0, direct.raw(), now],
        )?;
        let record = tx.query_row(
            &format!("SELECT {PROCESS_COLUMNS} FROM process_emissions WHERE process_id = ?1"),
            params![id.0],
            process_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn write_process_cumulative(
        &mut self,
        id: ProcessId,
        value: Quantity,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE process_emissions SET cumulative_emission = ?2, updated_at = ?3
             WHERE process_id = ?1",
            params![id.0, value.raw(), Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StorageError::ProcessNotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    fn list_process_emissions(&self) -> Result<Vec<ProcessEmission>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROCESS_COLUMNS} FROM process_emissions ORDER BY process_id"
        ))?;
        let records = stmt
            .query_map([], process_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl ProductEmissionStore for SqliteStore {
    fn get_product_emission(&self, id: ProductId) -> Result<ProductEmission, StorageError> {
        self.conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM product_emissions WHERE product_id = ?1"),
                params![id.0],
                product_from_row,
            )
            .optional()?
            .ok_or(StorageError::ProductNotFound(id))
    }

    fn set_product_amounts(
        &mut self,
        id: ProductId,
        amounts: ProductAmounts,
    ) -> Result<ProductEmission, StorageError> {
        amounts.validate()?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO product_emissions
                 (product_id, direct_emission, allocated_emission, produced_amount,
                  sold_amount, eu_sold_amount, updated_at)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (product_id) DO UPDATE
             SET direct_emission = excluded.direct_emission,
                 produced_amount = excluded.produced_amount,
                 sold_amount = excluded.sold_amount,
                 eu_sold_amount = excluded.eu_sold_amount,
                 updated_at = excluded.updated_at",
            params![
                id.0,
                amounts.direct_emission.raw(),
                amounts.produced_amount.raw(),
                amounts.sold_amount.raw(),
                amounts.eu_sold_amount.raw(),
                now,
            ],
        )?;
        let record = tx.query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM product_emissions WHERE product_id = ?1"),
            params![id.0],
            product_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn write_product_allocated(
        &mut self,
        id: ProductId,
        value: Quantity,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE product_emissions SET allocated_emission = ?2, updated_at = ?3
             WHERE product_id = ?1",
            params![id.0, value.raw(), Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StorageError::ProductNotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    fn list_product_emissions(&self) -> Result<Vec<ProductEmission>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM product_emissions ORDER BY product_id"
        ))?;
        let records = stmt
            .query_map([], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
