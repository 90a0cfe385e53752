//! Courier
//!
//! Sends notifications through the delivery subsystem using credentials from
//! the environment. Useful for checking which channel a deployment ends up on
//! and whether it actually delivers.

use clap::{Parser, Subcommand};
use core_config::Environment;
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_notifications::{InitializationState, NotificationService, PaymentFailedData, SendResult};
use eyre::Result;
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Send transactional notifications over the configured channel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a verification code (fails if delivery fails)
    Verify {
        /// Recipient address
        to: String,
        /// Code to deliver
        code: String,
    },

    /// Send a welcome email (fails if delivery fails)
    Welcome {
        /// Recipient address
        to: String,
        /// Name shown in the greeting
        #[arg(short, long)]
        name: String,
    },

    /// Send a pre-rendered email
    Send {
        /// Recipient address
        to: String,
        #[arg(short, long)]
        subject: String,
        /// HTML body
        #[arg(long)]
        html: String,
        /// Optional plain-text alternative
        #[arg(long)]
        text: Option<String>,
    },

    /// Send a payment-failed billing notice
    PaymentFailed {
        /// Recipient address
        to: String,
        /// Formatted amount, e.g. "$9.99"
        #[arg(short, long)]
        amount: String,
        #[arg(long)]
        customer_name: Option<String>,
        #[arg(long)]
        invoice_url: Option<String>,
        /// Date of the next collection attempt
        #[arg(long)]
        next_retry_date: Option<String>,
    },

    /// Provision the channel and show which one is active
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let cli = Cli::parse();

    let service = NotificationService::from_env()?;
    service.spawn_initialization();

    match cli.command {
        Commands::Verify { to, code } => {
            let result = service.send_verification_code(&to, &code).await?;
            print_result(&result)?;
        }

        Commands::Welcome { to, name } => {
            let result = service.send_welcome_email(&to, &name).await?;
            print_result(&result)?;
        }

        Commands::Send {
            to,
            subject,
            html,
            text,
        } => {
            let result = service
                .send_email(&to, &subject, &html, text.as_deref())
                .await;
            print_result(&result)?;
        }

        Commands::PaymentFailed {
            to,
            amount,
            customer_name,
            invoice_url,
            next_retry_date,
        } => {
            let data = PaymentFailedData {
                customer_name,
                amount,
                invoice_url,
                next_retry_date,
            };
            let result = service.send_payment_failed(&to, &data).await;
            print_result(&result)?;
        }

        Commands::Status => {
            let channel = service.ensure_initialized().await;
            service.provisioner().wait_for_connectivity_check().await;

            let state = match service.initialization_state() {
                InitializationState::Degraded => "degraded",
                InitializationState::Ready(_) => "ready",
                InitializationState::Initializing => "initializing",
                InitializationState::Uninitialized => "uninitialized",
            };
            info!(channel = %channel, state, "Channel status");

            let status = json!({
                "channel": channel.to_string(),
                "state": state,
                "appName": service.config().app_name,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn print_result(result: &SendResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
