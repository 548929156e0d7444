use anyhow::Context;
use clap::Parser;
use weblounge::settings::config::Settings;
use weblounge::site::SiteState;
use weblounge::{app_state, init_telemetry};
use weblounge_core::security::Permission;

#[derive(Parser)]
#[command(name = "weblounge")]
#[command(about = "Site security for weblounge")]
#[clap(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser)]
enum Commands {
    /// Show current configuration and exit
    Config,
    /// List the loaded sites and their state (default)
    Sites {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a user holds a permission on a secured object
    Check {
        #[arg(long)]
        site: String,
        /// Path of the object below the site's contexts folder, without extension
        #[arg(long)]
        object: String,
        #[arg(long)]
        user: String,
        /// Permission as `context:identifier`, e.g. `system:write`
        #[arg(long)]
        permission: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sites { json: false });

    if let Commands::Config = command {
        let app_state = app_state::AppState::new_for_config_only().await?;
        println!("{:#?}", &app_state.settings);
        return Ok(());
    }

    let settings = Settings::new()?;
    init_telemetry::init_telemetry_and_tracing(&settings.telemetry)?;
    let app_state = app_state::AppState::new(settings).await?;

    match command {
        Commands::Config => {}
        Commands::Sites { json } => {
            let sites = app_state.security.sites().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&sites)?);
            } else {
                for site in sites {
                    match site.state {
                        SiteState::Enabled => println!(
                            "{:<24} enabled   {} users, {} groups, {} objects",
                            site.identifier, site.users, site.groups, site.objects
                        ),
                        SiteState::Disabled { reason } => {
                            println!("{:<24} disabled  {}", site.identifier, reason)
                        }
                    }
                }
            }
        }
        Commands::Check {
            site,
            object,
            user,
            permission,
        } => {
            let permission: Permission = permission
                .parse()
                .with_context(|| format!("Invalid permission '{permission}'"))?;
            let granted = app_state
                .security
                .check_permission(&site, &object, &user, &permission)
                .await;
            println!(
                "{} {} '{}' on {}/{}",
                user,
                if granted { "holds" } else { "does not hold" },
                permission,
                site,
                object
            );
            if !granted {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
