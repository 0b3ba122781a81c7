//! Postgres-backed ledger

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseBackend, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait, Value,
};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::entity::{clients, deals, drives, manifest_entries, manifests, pieces, proposals, providers};
use crate::ledger::{
    DealLedger, DealRecord, KnownManifest, ManifestBatch, ManifestLedger, PendingProposal, ProposalLedger,
    TrackedDeal,
};
use crate::status::DealStatus;

/// Rows per multi-row INSERT; keeps statements well below the bind-parameter limit.
const INSERT_CHUNK_SIZE: usize = 1000;

const BACKFILL_ROOT_CIDS_SQL: &str = r#"
UPDATE pieces
    SET root_cid = claimed_root_cid
WHERE
    root_cid IS NULL
        AND
    claimed_root_cid IS NOT NULL
        AND
    ( claimed_root_cid, payload_size ) IN (
        SELECT claimed_root_cid, ( meta->>'size' )::BIGINT
            FROM manifest_entries
        WHERE
            ( COALESCE( ( meta->>'valid_commp' )::BOOLEAN, false ) OR COALESCE( ( meta->>'valid_header' )::BOOLEAN, false ) )
                AND
            COALESCE( ( meta->>'valid_size' )::BOOLEAN, false )
    )
"#;

// The RETURNING subselect reads the snapshot taken before this statement, so
// it yields the status the row had prior to the upsert (NULL on insert).
const UPSERT_DEAL_SQL: &str = r#"
INSERT INTO deals
    ( id, piece_cid, label, provider, client, verified, start_epoch, end_epoch, status, status_detail, sector_start_epoch )
    VALUES ( $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11 )
ON CONFLICT ( id ) DO UPDATE SET
    status = CASE
        WHEN deals.status = 'terminated' THEN deals.status
        WHEN deals.status = 'active' AND EXCLUDED.status = 'published' THEN deals.status
        ELSE EXCLUDED.status
    END,
    status_detail = CASE
        WHEN deals.status = 'terminated' THEN deals.status_detail
        WHEN deals.status = 'active' AND EXCLUDED.status = 'published' THEN deals.status_detail
        ELSE EXCLUDED.status_detail
    END,
    sector_start_epoch = COALESCE( EXCLUDED.sector_start_epoch, deals.sector_start_epoch )
RETURNING (
    SELECT prior.status
        FROM deals prior
    WHERE prior.id = deals.id
) AS prior_status
"#;

const TRACKED_DEALS_SQL: &str = r#"
SELECT d.id, d.piece_cid, d.status
    FROM deals d
    JOIN pieces p USING ( piece_cid )
"#;

pub struct Database {
    connection: DatabaseConnection,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Connecting to Postgres ledger...");

        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY: Duration = Duration::from_secs(2);

        loop {
            attempts += 1;

            // A cron run holds few connections for a short time
            let mut opt = ConnectOptions::new(database_url.to_string());
            opt.max_connections(16)
                .min_connections(1)
                .connect_timeout(Duration::from_secs(10))
                .acquire_timeout(Duration::from_secs(60))
                .idle_timeout(Duration::from_secs(300))
                .sqlx_logging(true)
                .sqlx_logging_level(tracing::log::LevelFilter::Debug)
                .sqlx_slow_statements_logging_settings(tracing::log::LevelFilter::Warn, Duration::from_secs(5));

            match SeaOrmDatabase::connect(opt).await {
                Ok(connection) => {
                    info!("Connected to Postgres ledger");
                    return Ok(Self { connection });
                }
                Err(e) if attempts < MAX_ATTEMPTS => {
                    warn!(
                        "Failed to connect to Postgres (attempt {}/{}): {}",
                        attempts, MAX_ATTEMPTS, e
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    error!("Failed to connect to Postgres after {} attempts", MAX_ATTEMPTS);
                    return Err(anyhow!("Database connection failed: {}", e));
                }
            }
        }
    }
}

#[async_trait]
impl ManifestLedger for Database {
    async fn known_manifests(&self) -> Result<Vec<KnownManifest>> {
        let rows: Vec<(String, chrono::DateTime<chrono::Utc>)> = manifests::Entity::find()
            .select_only()
            .column(manifests::Column::Id)
            .column(manifests::Column::UploadedAt)
            .into_tuple()
            .all(&self.connection)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, uploaded_at)| KnownManifest { id, uploaded_at })
            .collect())
    }

    async fn known_drive_serials(&self) -> Result<HashSet<String>> {
        let serials: Vec<String> = drives::Entity::find()
            .select_only()
            .column(drives::Column::Serial)
            .into_tuple()
            .all(&self.connection)
            .await?;
        Ok(serials.into_iter().collect())
    }

    async fn ingest_manifests(&self, batch: ManifestBatch) -> Result<u64> {
        let start_time = Instant::now();
        let txn = self.connection.begin().await?;

        if !batch.drives.is_empty() {
            let rows = batch
                .drives
                .iter()
                .map(|serial| drives::ActiveModel {
                    serial: Set(serial.clone()),
                });
            let inserted = drives::Entity::insert_many(rows)
                .on_conflict(OnConflict::column(drives::Column::Serial).do_nothing().to_owned())
                .exec_without_returning(&txn)
                .await?;
            debug!("Inserted {} drive rows", inserted);
        }

        for chunk in batch.manifests.chunks(INSERT_CHUNK_SIZE) {
            let rows = chunk.iter().map(|m| manifests::ActiveModel {
                id: Set(m.id.clone()),
                drive_serial: Set(m.drive_serial.clone()),
                validated_at: Set(m.validated_at),
                uploaded_at: Set(m.uploaded_at),
            });
            manifests::Entity::insert_many(rows)
                .exec_without_returning(&txn)
                .await?;
        }

        for chunk in batch.entries.chunks(INSERT_CHUNK_SIZE) {
            let rows = chunk.iter().map(|e| manifest_entries::ActiveModel {
                manifest_id: Set(e.manifest_id.clone()),
                claimed_root_cid: Set(e.claimed_root_cid.clone()),
                local_path: Set(e.local_path.clone()),
                meta: Set(e.meta.clone()),
            });
            manifest_entries::Entity::insert_many(rows)
                .exec_without_returning(&txn)
                .await?;
        }

        let new_roots = txn
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                BACKFILL_ROOT_CIDS_SQL,
            ))
            .await?
            .rows_affected();

        txn.commit().await?;

        debug!(
            "Ingested {} manifests with {} entries in {}ms, {} root CIDs backfilled",
            batch.manifests.len(),
            batch.entries.len(),
            start_time.elapsed().as_millis(),
            new_roots
        );

        Ok(new_roots)
    }
}

#[async_trait]
impl ProposalLedger for Database {
    async fn pending_proposals(&self) -> Result<Vec<PendingProposal>> {
        let rows = proposals::Entity::find()
            .filter(proposals::Column::SuccessCid.is_null())
            .filter(proposals::Column::FailureText.eq(""))
            .order_by_asc(proposals::Column::StartTime)
            .order_by_asc(proposals::Column::PieceCid)
            .all(&self.connection)
            .await?;

        Ok(rows
            .into_iter()
            .map(|p| PendingProposal {
                provider: p.provider,
                piece_cid: p.piece_cid,
                client: p.client,
                payload: p.payload,
                start_time: p.start_time,
            })
            .collect())
    }

    async fn record_proposal_success(&self, provider: &str, piece_cid: &str, success_cid: &str) -> Result<bool> {
        let result = proposals::Entity::update_many()
            .col_expr(proposals::Column::SuccessCid, Expr::value(success_cid))
            .filter(proposals::Column::Provider.eq(provider))
            .filter(proposals::Column::PieceCid.eq(piece_cid))
            .filter(proposals::Column::SuccessCid.is_null())
            .filter(proposals::Column::FailureText.eq(""))
            .exec(&self.connection)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn record_proposal_failure(&self, provider: &str, piece_cid: &str, failure: &str) -> Result<bool> {
        let result = proposals::Entity::update_many()
            .col_expr(proposals::Column::FailureText, Expr::value(failure))
            .filter(proposals::Column::Provider.eq(provider))
            .filter(proposals::Column::PieceCid.eq(piece_cid))
            .filter(proposals::Column::SuccessCid.is_null())
            .filter(proposals::Column::FailureText.eq(""))
            .exec(&self.connection)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl DealLedger for Database {
    async fn eligible_pieces(&self) -> Result<HashSet<String>> {
        let cids: Vec<String> = pieces::Entity::find()
            .select_only()
            .column(pieces::Column::PieceCid)
            .into_tuple()
            .all(&self.connection)
            .await?;
        Ok(cids.into_iter().collect())
    }

    async fn tracked_deals(&self) -> Result<HashMap<i64, TrackedDeal>> {
        let rows = self
            .connection
            .query_all(Statement::from_string(DatabaseBackend::Postgres, TRACKED_DEALS_SQL))
            .await?;

        let mut deals = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("", "id")?;
            let status: String = row.try_get("", "status")?;
            deals.insert(
                id,
                TrackedDeal {
                    piece_cid: row.try_get("", "piece_cid")?,
                    status: status.parse()?,
                },
            );
        }
        Ok(deals)
    }

    async fn verified_clients(&self) -> Result<Vec<String>> {
        Ok(clients::Entity::find()
            .select_only()
            .column(clients::Column::Address)
            .order_by_asc(clients::Column::Address)
            .into_tuple()
            .all(&self.connection)
            .await?)
    }

    async fn known_providers(&self) -> Result<HashSet<String>> {
        let addresses: Vec<String> = providers::Entity::find()
            .select_only()
            .column(providers::Column::Address)
            .into_tuple()
            .all(&self.connection)
            .await?;
        Ok(addresses.into_iter().collect())
    }

    async fn register_provider(&self, address: &str) -> Result<()> {
        providers::Entity::insert(providers::ActiveModel {
            address: Set(address.to_string()),
        })
        .on_conflict(OnConflict::column(providers::Column::Address).do_nothing().to_owned())
        .exec_without_returning(&self.connection)
        .await?;
        Ok(())
    }

    async fn upsert_deal(&self, deal: &DealRecord) -> Result<Option<DealStatus>> {
        let values: Vec<Value> = vec![
            deal.deal_id.into(),
            deal.piece_cid.clone().into(),
            deal.label.clone().into(),
            deal.provider.clone().into(),
            deal.client.clone().into(),
            deal.verified.into(),
            deal.start_epoch.into(),
            deal.end_epoch.into(),
            deal.status.as_str().into(),
            deal.status_detail.clone().into(),
            deal.sector_start_epoch.into(),
        ];
        let stmt = Statement::from_sql_and_values(DatabaseBackend::Postgres, UPSERT_DEAL_SQL, values);

        let row = self
            .connection
            .query_one(stmt)
            .await?
            .ok_or_else(|| anyhow!("Upsert of deal {} returned no row", deal.deal_id))?;

        let prior: Option<String> = row.try_get("", "prior_status")?;
        prior.map(|s| s.parse()).transpose()
    }

    async fn link_active_deal(&self, deal_id: i64, piece_cid: &str, provider: &str, client: &str) -> Result<bool> {
        let result = proposals::Entity::update_many()
            .col_expr(proposals::Column::ActiveDealId, Expr::value(deal_id))
            .filter(proposals::Column::FailureText.eq(""))
            .filter(proposals::Column::SuccessCid.is_not_null())
            .filter(proposals::Column::ActiveDealId.is_null())
            .filter(proposals::Column::PieceCid.eq(piece_cid))
            .filter(proposals::Column::Provider.eq(provider))
            .filter(proposals::Column::Client.eq(client))
            .exec(&self.connection)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn sweep_missing_deals(&self, deal_ids: &[i64], detail: &str) -> Result<u64> {
        let mut changed = 0;
        for chunk in deal_ids.chunks(INSERT_CHUNK_SIZE) {
            let result = deals::Entity::update_many()
                .col_expr(deals::Column::Status, Expr::value(DealStatus::Terminated.as_str()))
                .col_expr(deals::Column::StatusDetail, Expr::value(detail))
                .filter(deals::Column::Id.is_in(chunk.iter().copied()))
                .filter(deals::Column::Status.ne(DealStatus::Terminated.as_str()))
                .exec(&self.connection)
                .await?;
            changed += result.rows_affected;
        }
        Ok(changed)
    }

    async fn update_client_datacap(&self, address: &str, outstanding: i64, allowance: Option<String>) -> Result<()> {
        clients::Entity::update_many()
            .col_expr(clients::Column::OutstandingDatacap, Expr::value(outstanding.max(0)))
            .col_expr(clients::Column::DatacapAllowance, Expr::value(allowance))
            .filter(clients::Column::Address.eq(address))
            .exec(&self.connection)
            .await?;
        Ok(())
    }
}
