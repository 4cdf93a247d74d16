use bookflow::config::Config;
use bookflow::db;
use bookflow::jobs::credentials::{CredentialSource, PgCredentialSource};
use bookflow::jobs::timeline::build_timeline;
use bookflow::jobs::{AttemptsRepo, CredentialsRepo, JobsRepo, NewReservationJob};
use bookflow::providers::{Credentials, HttpProviderFactory, ProviderFactory, ProviderKind};
use bookflow::reservation::split_csv;
use bookflow::window::{compute_window, parse_local_time, Window};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bookflowctl")]
#[command(about = "Operate the reservation booking engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Inputs that decide when the attempt window opens.
#[derive(Args, Debug, Clone)]
struct WindowArgs {
    /// Reservation date, YYYY-MM-DD
    #[arg(long)]
    date: NaiveDate,

    /// IANA time zone of the venue
    #[arg(long, default_value = "America/New_York")]
    timezone: String,

    /// How many days ahead the venue releases tables
    #[arg(long, default_value_t = 30)]
    days_out: i64,

    /// Local release time, HH:MM
    #[arg(long, default_value = "00:00")]
    release: String,

    /// Minutes to start polling before release
    #[arg(long, default_value_t = 5)]
    lead: i64,

    /// Minutes to keep polling after release
    #[arg(long, default_value_t = 20)]
    window: i64,
}

impl WindowArgs {
    fn compute(&self) -> anyhow::Result<Window> {
        Ok(compute_window(
            self.date,
            &self.timezone,
            self.days_out,
            &self.release,
            self.lead,
            self.window,
        )?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Apply embedded migrations
    Migrate,

    /// Print the attempt window for a reservation (no database)
    Window {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Compute the window and store a new reservation job
    CreateJob {
        #[arg(long)]
        user_id: Uuid,

        #[arg(long)]
        name: String,

        /// resy | opentable
        #[arg(long, default_value = "resy")]
        provider: String,

        #[arg(long)]
        venue_id: String,

        #[arg(long, default_value_t = 2)]
        party_size: i32,

        /// Comma-separated HH:MM list, most wanted first
        #[arg(long, default_value = "19:00,19:15,18:45")]
        preferred: String,

        /// Optional comma-separated slot types, e.g. "Dining Room,Bar"
        #[arg(long, default_value = "")]
        types: String,

        /// Seconds between attempts inside the window
        #[arg(long, default_value_t = 10)]
        interval: i32,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// List a user's jobs, newest first
    ListJobs {
        #[arg(long)]
        user_id: Uuid,
    },

    /// Print a job with its attempt history
    Timeline { job_id: Uuid },

    /// Check provider reachability with the user's credentials
    Ping {
        #[arg(long)]
        user_id: Uuid,

        #[arg(long, default_value = "resy")]
        provider: String,
    },

    /// Store provider credentials for a user
    SetCredentials {
        #[arg(long)]
        user_id: Uuid,

        #[arg(long)]
        provider: String,

        #[arg(long, default_value = "")]
        api_key: String,

        #[arg(long, default_value = "")]
        auth_token: String,

        /// OpenTable persisted query hash override
        #[arg(long)]
        query_hash: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bookflow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Window { window } => {
            let w = window.compute()?;
            print_window(&w);
        }
        Commands::Migrate => {
            let (_, pool) = connect().await?;
            db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        Commands::CreateJob {
            user_id,
            name,
            provider,
            venue_id,
            party_size,
            preferred,
            types,
            interval,
            window,
        } => {
            let w = window.compute()?;
            let preferred_times = split_csv(&preferred)
                .iter()
                .map(|t| parse_local_time(t))
                .collect::<Result<Vec<_>, _>>()?;

            let job = NewReservationJob {
                user_id,
                name,
                provider: ProviderKind::parse(&provider)?,
                venue_id,
                party_size,
                reservation_date: window.date,
                preferred_times,
                reservation_types: split_csv(&types).join(","),
                timezone: window.timezone.clone(),
                window_start_at: w.start,
                window_end_at: w.end,
                interval_seconds: interval,
            };
            job.validate()?;

            let (_, pool) = connect().await?;
            let id = JobsRepo::new(pool).create(&job).await?;
            println!("created job {id}");
            print_window(&w);
        }
        Commands::ListJobs { user_id } => {
            let (_, pool) = connect().await?;
            let jobs = JobsRepo::new(pool).list_by_user(user_id).await?;
            if jobs.is_empty() {
                println!("no jobs for {user_id}");
            }
            for j in jobs {
                println!(
                    "{}  {:<8} {:<9} venue={} date={} window=[{} .. {}] last_error={}",
                    j.id,
                    j.status,
                    j.provider,
                    j.venue_id,
                    j.reservation_date,
                    j.window_start_at.to_rfc3339(),
                    j.window_end_at.to_rfc3339(),
                    j.last_error.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Timeline { job_id } => {
            let (_, pool) = connect().await?;
            let jobs = JobsRepo::new(pool.clone());
            let attempts = AttemptsRepo::new(pool);
            match build_timeline(&jobs, &attempts, job_id).await? {
                Some(tl) => println!("{}", serde_json::to_string_pretty(&tl)?),
                None => anyhow::bail!("job {job_id} not found"),
            }
        }
        Commands::Ping { user_id, provider } => {
            let (cfg, pool) = connect().await?;
            let kind = ProviderKind::parse(&provider)?;

            let source = PgCredentialSource::new(
                CredentialsRepo::new(pool),
                cfg.fallback_credentials(),
            );
            let creds = source.credentials_for(user_id, kind).await?;
            let factory = HttpProviderFactory::new(reqwest::Client::new(), cfg.provider_settings());

            factory.build(kind, creds).ping().await?;
            println!("{kind}: ok");
        }
        Commands::SetCredentials {
            user_id,
            provider,
            api_key,
            auth_token,
            query_hash,
        } => {
            let kind = ProviderKind::parse(&provider)?;
            let (_, pool) = connect().await?;
            CredentialsRepo::new(pool)
                .upsert(
                    user_id,
                    kind,
                    &Credentials {
                        api_key,
                        auth_token,
                        persisted_query_hash: query_hash,
                    },
                )
                .await?;
            println!("credentials stored for {user_id} ({kind})");
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<(Config, PgPool)> {
    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url, &cfg.pool_settings()).await?;
    Ok((cfg, pool))
}

fn print_window(w: &Window) {
    println!("opens at:     {}", w.open_at.to_rfc3339());
    println!("window start: {}", w.start.to_rfc3339());
    println!("window end:   {}", w.end.to_rfc3339());
}
