use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use social_gate::auth::{
    CanonicalV1, Canonicalizer, Role, RoleMapping, SignedRequest, generate_credentials,
    sign_request,
};
use social_gate::db::{AdminCreate, QueryBuilder};
use social_gate::types::ApiSecret;
use social_gate::{DatabaseConfig, GateConfig, create_app_state, create_connection, ensure_schema};

#[derive(Parser)]
#[command(name = "social-gate")]
#[command(about = "Request authentication gate for the multi-tenant social API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Server {
        #[arg(short, long, default_value = "8080")]
        port: u16,
        #[arg(long, default_value = "memory")]
        db_url: String,
        /// Gate config file (JSON). Defaults to $SOCIAL_GATE_CONFIG or ./social-gate.json
        #[arg(long, env = "SOCIAL_GATE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Initialize the database
    Init {
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Provision a tenant and print its credentials
    CreateTenant {
        #[arg(long)]
        app_code: String,
        #[arg(long)]
        app_name: String,
        #[arg(long)]
        site_id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Set a user's role within a tenant
    GrantRole {
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        user_id: i64,
        /// One of: administrator, poster, paid_member, free_member
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Print the signing headers for a request
    Sign {
        #[arg(long)]
        api_key: String,
        #[arg(long, env = "SOCIAL_GATE_API_SECRET")]
        secret: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        body: Option<String>,
        /// Unix seconds; defaults to now
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("social_gate=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            db_url,
            config,
        } => {
            let gate_config = GateConfig::load(config)?;

            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Using database url for server: {}", db_config.url);

            let db = create_connection(db_config).await?;
            ensure_schema(&db).await?;

            let state = create_app_state(&gate_config, db).await?;
            let app = social_gate::create_router(state);

            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
            info!("Server listening on http://0.0.0.0:{}", port);

            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Using database url for initialization: {}", db_config.url);

            info!("Initializing database...");
            let db = create_connection(db_config).await?;
            ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::CreateTenant {
            app_code,
            app_name,
            site_id,
            description,
            db_url,
        } => {
            let db = create_connection(DatabaseConfig {
                url: db_url,
                ..Default::default()
            })
            .await?;
            ensure_schema(&db).await?;

            let (api_key, api_secret) = generate_credentials();
            let record = QueryBuilder::create_admin(
                &db,
                &AdminCreate {
                    app_code,
                    app_name: app_name.clone(),
                    site_id,
                    api_key: api_key.to_string(),
                    api_secret: api_secret.expose_str().to_string(),
                    description,
                },
            )
            .await?;
            info!(tenant_id = %record.id, "tenant created");

            println!("Tenant created successfully!");
            println!();
            println!("  Id:      {}", record.id);
            println!("  App:     {}", app_name);
            println!("  Key:     {}", api_key);
            println!("  Secret:  {}", api_secret.expose_str());
            println!();
            println!("IMPORTANT: Save the secret now. It is not shown again.");
        }
        Commands::GrantRole {
            api_key,
            user_id,
            role,
            db_url,
        } => {
            let role: Role = role.parse()?;
            if role == Role::NonRegisteredUser {
                return Err(anyhow!("non_registered_user cannot be granted"));
            }

            let gate_config = GateConfig::load(None)?;
            let mapping = RoleMapping::from_values(&gate_config.roles)?;

            let db = create_connection(DatabaseConfig {
                url: db_url,
                ..Default::default()
            })
            .await?;
            ensure_schema(&db).await?;

            let admin = QueryBuilder::find_live_admin_by_api_key(&db, &api_key)
                .await?
                .ok_or_else(|| anyhow!("No live tenant with api key '{}'", api_key))?;
            let admin_id = admin.id.to_string();

            QueryBuilder::upsert_member_role(&db, &admin_id, user_id, mapping.value_of(role))
                .await?;
            println!("User {} is now {} in {}", user_id, role, admin_id);
        }
        Commands::Sign {
            api_key,
            secret,
            method,
            path,
            query,
            body,
            timestamp,
        } => {
            let timestamp = timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp())
                .to_string();
            let body = body.unwrap_or_default();
            let request = SignedRequest {
                method: &method,
                path: &path,
                query: query.as_deref(),
                timestamp: &timestamp,
                api_key: &api_key,
                body: body.as_bytes(),
            };

            let canonicalizer = CanonicalV1;
            let signature = sign_request(&ApiSecret::new(secret), &canonicalizer, &request)?;
            let headers = GateConfig::load(None)?.headers;

            println!("{}: {}", headers.api_key, api_key);
            println!("{}: {}", headers.timestamp, timestamp);
            println!("{}: {}", headers.signature, signature);
            info!(
                version = canonicalizer.version(),
                "signed {} {}",
                method.to_uppercase(),
                path
            );
        }
    }

    Ok(())
}
