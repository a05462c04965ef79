//! Process entry point: load configuration, wire up the database pool,
//! TUN device, IP pool and session registry, then hand off to the
//! supervisor. Grounded on the teacher's `run_server`
//! (`src/server/main.rs`) for sequencing and `init_tracing`
//! (`src/utils/mod.rs`) for logging setup.

use clap::Parser;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vpnd::auth::repository::PgUserRepository;
use vpnd::auth::token::TokenManager;
use vpnd::auth::AuthService;
use vpnd::config::Config;
use vpnd::pool::IpPool;
use vpnd::registry::SessionRegistry;
use vpnd::supervisor::Supervisor;
use vpnd::tun::kernel::KernelTun;
use vpnd::tun::TunConfig;

#[derive(Parser, Debug)]
#[command(name = "vpnd", about = "TLS-terminated remote-access VPN server")]
struct Args {
    /// Run database migrations on startup and exit.
    #[arg(long)]
    migrate_only: bool,
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_line_number(true)
            .with_file(true)
            .finish(),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> vpnd::Result<()> {
    let args = Args::parse();

    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize logging: {e}");
        return Err(e);
    }

    let config = Arc::new(Config::from_env()?);
    tracing::info!(addr = %config.listen_addr(), subnet = %config.vpn_subnet, "starting vpnd");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url())
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    if args.migrate_only {
        tracing::info!("migrations applied, exiting (--migrate-only)");
        return Ok(());
    }

    let repo = Arc::new(PgUserRepository::new(pool));
    let tokens = TokenManager::new(config.jwt_secret.as_bytes(), 3600);
    let auth = Arc::new(AuthService::new(repo, tokens));

    let ip_pool = Arc::new(IpPool::new(config.vpn_subnet));
    let registry = Arc::new(SessionRegistry::new());

    let tun = KernelTun::create(TunConfig {
        address: config.vpn_gateway,
        netmask: config.vpn_subnet.netmask(),
        mtu: config.vpn_mtu as u16,
    })
    .await?;
    let tun: Arc<dyn vpnd::tun::TunDevice> = Arc::new(tun);

    let supervisor = Supervisor::new(config, auth, ip_pool, registry, tun);
    supervisor.run().await
}
