use anyhow::Context;
use clap::{Parser, Subcommand};
use marketlog_core::config::Settings;
use marketlog_core::document::encode_document;
use marketlog_core::domain::event::{EventSlot, EventSubmission};
use marketlog_core::service::TradingDayService;
use marketlog_core::storage::{lock, metadata};
use marketlog_core::time::kr_market::resolve_trading_date;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "marketlog_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge one market event into the trading-day document.
    Submit {
        /// morning-open, morning-close, afternoon-open or afternoon-close.
        #[arg(long)]
        slot: EventSlot,

        #[arg(long, allow_hyphen_values = true)]
        index: f64,

        #[arg(long, allow_hyphen_values = true)]
        change: f64,

        /// Open events only. Separate lines with `<br>` or a newline.
        #[arg(long)]
        highlights: Option<String>,

        /// Trading date (YYYY-MM-DD). Defaults to the current KRX business day.
        #[arg(long)]
        date: Option<String>,

        /// Print the merged document instead of writing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the stored document in canonical form.
    Show {
        #[arg(long)]
        date: Option<String>,
    },

    /// List indexed trading days (requires DATABASE_URL).
    List {
        #[arg(long, default_value_t = 30)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = match args.command {
        Command::Submit {
            slot,
            index,
            change,
            highlights,
            date,
            dry_run,
        } => {
            let submission = EventSubmission {
                slot,
                index,
                change,
                highlights,
            };
            run_submit(&settings, date.as_deref(), submission, dry_run).await
        }
        Command::Show { date } => run_show(&settings, date.as_deref()).await,
        Command::List { limit } => run_list(&settings, limit).await,
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker command failed");
    }
    res
}

async fn run_submit(
    settings: &Settings,
    date_arg: Option<&str>,
    submission: EventSubmission,
    dry_run: bool,
) -> anyhow::Result<()> {
    let date = resolve_trading_date(date_arg, chrono::Utc::now())?;
    let slot = submission.slot;

    if dry_run {
        let service = TradingDayService::from_settings(settings, None)?;
        let text = service.preview(date, submission).await?;
        tracing::info!(%date, %slot, dry_run = true, "merged document preview");
        print!("{text}");
        return Ok(());
    }

    let pool = connect_optional(settings).await?;

    if let Some(pool) = &pool {
        let acquired = lock::try_acquire_document_lock(pool, date).await?;
        if !acquired {
            anyhow::bail!("document lock for {date} is held by another writer; retry the {slot} event");
        }
    }

    let service = TradingDayService::from_settings(settings, pool.clone())?;
    let res = service.submit(date, submission).await;

    if let Some(pool) = &pool {
        if let Err(err) = lock::release_document_lock(pool, date).await {
            tracing::warn!(%date, error = %err, "document lock release failed");
        }
    }

    let record = res?;
    tracing::info!(%date, %slot, "event merged");
    print!("{}", encode_document(&record));
    Ok(())
}

async fn run_show(settings: &Settings, date_arg: Option<&str>) -> anyhow::Result<()> {
    let date = resolve_trading_date(date_arg, chrono::Utc::now())?;
    let service = TradingDayService::from_settings(settings, None)?;
    let text = service
        .document_text(date)
        .await
        .with_context(|| format!("read trading-day document failed (date={date})"))?;
    print!("{text}");
    Ok(())
}

async fn run_list(settings: &Settings, limit: i64) -> anyhow::Result<()> {
    let pool = connect_optional(settings)
        .await?
        .context("DATABASE_URL is required for list")?;

    for day in metadata::list_trading_days(&pool, limit).await? {
        println!(
            "{}\t{}\tclose={}\ttakeaways={}",
            day.trading_date,
            day.last_slot,
            day.afternoon_close_index
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "-".to_string()),
            day.has_takeaways
        );
    }
    Ok(())
}

// Single connection: the advisory lock is held by the session that took it.
async fn connect_optional(settings: &Settings) -> anyhow::Result<Option<sqlx::PgPool>> {
    let Some(db_url) = settings.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL missing; skipping document lock and trading-day index");
        return Ok(None);
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    marketlog_core::storage::migrate(&pool).await?;
    Ok(Some(pool))
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
