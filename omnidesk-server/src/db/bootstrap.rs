//! Idempotent schema bootstrap.
//!
//! Scripts live under `<bootstrap_path>/<stage>/*.sql`. The whole tree is
//! discovered up front into a [`BootstrapPlan`], so a missing stage fails the
//! start before any SQL has run. Each script is then applied in its own
//! transaction and must be safe to re-run on every start.

use std::fs;
use std::path::{Path, PathBuf};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};

use shared::config::server::DatabaseConfig;

/// Directory stages, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Tables and types.
    Schema,
    /// Functions and procedures over those tables, including `sp_healthz`.
    Procedures,
    Indexes,
}

impl Stage {
    const ORDERED: [Stage; 3] = [Stage::Schema, Stage::Procedures, Stage::Indexes];

    fn dir_name(self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Procedures => "procedures",
            Stage::Indexes => "indexes",
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap root {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("bootstrap stage directory {0} does not exist")]
    MissingStage(PathBuf),
    #[error("cannot {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("script {path} failed: {source}")]
    Sql {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

impl BootstrapError {
    fn io(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }

    fn sql(path: &Path) -> impl FnOnce(sqlx::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Sql { path, source }
    }
}

/// Every script to apply, already in execution order.
#[derive(Debug, Default)]
struct BootstrapPlan {
    scripts: Vec<(Stage, PathBuf)>,
}

impl BootstrapPlan {
    fn discover(root: &Path) -> Result<Self, BootstrapError> {
        if !root.is_dir() {
            return Err(BootstrapError::MissingRoot(root.to_path_buf()));
        }

        let mut plan = Self::default();
        for stage in Stage::ORDERED {
            let dir = root.join(stage.dir_name());
            if !dir.is_dir() {
                return Err(BootstrapError::MissingStage(dir));
            }
            let files = sql_files_in(&dir)?;
            debug!(stage = stage.dir_name(), count = files.len(), "discovered bootstrap scripts");
            plan.scripts
                .extend(files.into_iter().map(|path| (stage, path)));
        }
        Ok(plan)
    }
}

/// `.sql` files directly inside `dir`, sorted by file name.
fn sql_files_in(dir: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(BootstrapError::io("list", dir))? {
        let path = entry.map_err(BootstrapError::io("list", dir))?.path();
        let is_sql = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"));
        if is_sql && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Applies every bootstrap script found under `config.bootstrap_path`.
pub async fn run(pool: &PgPool, config: &DatabaseConfig) -> Result<(), BootstrapError> {
    let root = &config.bootstrap_path;
    let plan = BootstrapPlan::discover(root)?;
    info!(path = %root.display(), scripts = plan.scripts.len(), "running database bootstrap");

    let mut applied = 0usize;
    for (stage, path) in &plan.scripts {
        if apply(pool, path).await? {
            debug!(stage = stage.dir_name(), script = %path.display(), "bootstrap script applied");
            applied += 1;
        }
    }

    info!(applied, "database bootstrap complete");
    Ok(())
}

/// Runs one script in its own transaction. Returns `false` for blank files.
async fn apply(pool: &PgPool, path: &Path) -> Result<bool, BootstrapError> {
    let sql = fs::read_to_string(path).map_err(BootstrapError::io("read", path))?;
    let sql = sql.trim();
    if sql.is_empty() {
        warn!(script = %path.display(), "skipping empty bootstrap script");
        return Ok(false);
    }

    let mut tx = pool.begin().await.map_err(BootstrapError::sql(path))?;
    // Multi-statement scripts cannot go through a prepared query.
    sqlx::raw_sql(sql)
        .execute(&mut *tx)
        .await
        .map_err(BootstrapError::sql(path))?;
    tx.commit().await.map_err(BootstrapError::sql(path))?;
    Ok(true)
}

/// Startup connectivity check.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Succeeds once the procedures stage has installed `sp_healthz`, which
/// touches every core table.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("CALL sp_healthz()")
        .execute(pool)
        .await
        .map(|_| ())
}
