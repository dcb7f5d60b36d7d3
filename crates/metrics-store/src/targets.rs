//! Target enumeration and rotation.
//!
//! The measurement pass walks active pathnames in least-recently-tested order
//! so longest-untested pathnames surface first across all hosts. The only
//! write this module performs against the externally-managed configuration
//! tables is updating `tested_at`.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use vitals_types::{Host, MeasurementTarget};

use crate::{MetricStore, StoreError};

#[derive(Debug, FromRow)]
struct DbHost {
    host: String,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct DbPathname {
    pathname: String,
    tested_at: Option<DateTime<Utc>>,
}

/// An active pathname with its rotation timestamp.
#[derive(Debug, Clone)]
pub struct PathnameEntry {
    pub pathname: String,
    pub last_tested_at: Option<DateTime<Utc>>,
}

impl MetricStore {
    /// Active hosts, ordered by host name.
    pub async fn active_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let rows: Vec<DbHost> = sqlx::query_as(
            "SELECT host, is_active FROM hosts WHERE is_active = 1 ORDER BY host ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Host {
                host: r.host,
                is_active: r.is_active,
            })
            .collect())
    }

    /// Active pathnames ordered by (`tested_at` ascending, pathname
    /// ascending). SQLite sorts NULL first under ASC, so never-tested
    /// pathnames lead the pass.
    pub async fn active_pathnames(&self) -> Result<Vec<PathnameEntry>, StoreError> {
        let rows: Vec<DbPathname> = sqlx::query_as(
            "SELECT pathname, tested_at FROM pathnames \
             WHERE is_active = 1 ORDER BY tested_at ASC, pathname ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PathnameEntry {
                pathname: r.pathname,
                last_tested_at: r.tested_at,
            })
            .collect())
    }

    /// The full ordered cross product of active pathnames and hosts,
    /// pathname-major.
    pub async fn list_targets(&self) -> Result<Vec<MeasurementTarget>, StoreError> {
        let pathnames = self.active_pathnames().await?;
        let hosts = self.active_hosts().await?;

        let mut targets = Vec::with_capacity(pathnames.len() * hosts.len());
        for entry in &pathnames {
            for host in &hosts {
                targets.push(MeasurementTarget {
                    host: host.host.clone(),
                    pathname: entry.pathname.clone(),
                    last_tested_at: entry.last_tested_at,
                });
            }
        }
        Ok(targets)
    }

    /// Record that a pass has begun processing `pathname`. Called before the
    /// host loop so a pathname failing on every host still rotates out of
    /// immediate priority.
    pub async fn mark_tested(
        &self,
        pathname: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE pathnames SET tested_at = ? WHERE pathname = ?")
            .bind(now)
            .bind(pathname)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a host row. Management of these rows is owned by the external
    /// configuration layer; this exists for that layer and for tests.
    pub async fn add_host(&self, host: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO hosts (host) VALUES (?)")
            .bind(host)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a pathname row.
    pub async fn add_pathname(&self, pathname: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO pathnames (pathname) VALUES (?)")
            .bind(pathname)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_host_active(&self, host: &str, active: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE hosts SET is_active = ? WHERE host = ?")
            .bind(active)
            .bind(host)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_pathname_active(
        &self,
        pathname: &str,
        active: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE pathnames SET is_active = ? WHERE pathname = ?")
            .bind(active)
            .bind(pathname)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
