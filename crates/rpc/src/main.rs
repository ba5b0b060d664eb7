//! Hearth CLI - Main entry point

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use hearth_core::LoanId;
use hearth_cycle::ExportFormat;
use hearth_recon::{ExceptionCategory, ExceptionFilter, ExceptionState, ReconciliationStatus, Severity};
use hearth_rpc::commands::{self, BoardRequest};
use hearth_rpc::{AppContext, HearthConfig};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Hearth - mortgage servicing financial core", long_about = None)]
struct Cli {
    /// Config file (JSON); falls back to $HEARTH_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(short, long)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and write a default config into it
    Init,

    /// Board a loan and post its disbursement
    Board {
        loan_id: String,
        /// Principal disbursed, e.g. 250000.00
        principal: String,
        /// Annual rate as a fraction, e.g. 0.065
        #[arg(long)]
        rate: Decimal,
        #[arg(long)]
        first_due: NaiveDate,
        /// Monthly principal and interest
        #[arg(long)]
        installment: String,
        #[arg(long)]
        escrow: Option<String>,
        #[arg(long)]
        late_fee: Option<String>,
        #[arg(long)]
        grace_days: Option<i64>,
        /// Boarding date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Apply a borrower payment through the waterfall
    Pay {
        loan_id: String,
        amount: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "portal")]
        channel: String,
        /// Channel reference; repeats are reported as duplicates
        #[arg(long)]
        external_ref: Option<String>,
    },

    /// Reverse a posted event
    Reverse {
        event_id: String,
        #[arg(long)]
        reason: String,
    },

    /// Show derived balances for a loan
    Balance {
        loan_id: String,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// List ledger events for a loan
    History {
        loan_id: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Import a CSV bank statement
    Import {
        bank_account_id: String,
        file: PathBuf,
    },

    /// Bank transaction matching
    #[command(subcommand)]
    Recon(ReconCommand),

    /// Reconciliation exception queue
    #[command(subcommand)]
    Exception(ExceptionCommand),

    /// Transfer batches and bank callbacks
    #[command(subcommand)]
    Transfer(TransferCommand),

    /// Servicing cycle runs
    #[command(subcommand)]
    Cycle(CycleCommand),

    /// Audit log
    #[command(subcommand)]
    Audit(AuditCommand),
}

#[derive(Subcommand)]
enum ReconCommand {
    /// List imported bank transactions
    List {
        #[arg(long)]
        status: Option<ReconciliationStatus>,
    },
    /// Ranked ledger candidates for a bank transaction
    Candidates { bank_txn_id: Uuid },
    /// Confirm a match between a bank transaction and a ledger event
    Confirm { bank_txn_id: Uuid, event_id: String },
    /// Raise exceptions for transactions pending past the grace period
    Promote {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ExceptionCommand {
    /// List exceptions (open ones unless --all or --state is given)
    List {
        #[arg(long)]
        state: Option<ExceptionState>,
        #[arg(long)]
        category: Option<ExceptionCategory>,
        #[arg(long)]
        min_severity: Option<Severity>,
        #[arg(long)]
        loan: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Assign an exception to a person
    Assign { id: Uuid, assignee: String },
    /// Mark an open exception as being worked
    Pending { id: Uuid },
    /// Close an exception with a resolution note
    Resolve {
        id: Uuid,
        #[arg(long)]
        note: String,
    },
    /// Cancel an exception raised in error
    Cancel {
        id: Uuid,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand)]
enum TransferCommand {
    /// Submit a batch from a JSON array of entries
    Submit {
        file: PathBuf,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Write a batch to the outbox and mark it sent
    Send { batch_id: Uuid },
    /// Record settlement of an entry
    Settle {
        trace_number: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Record a return of an entry
    Return {
        trace_number: String,
        /// Return reason code, e.g. R01
        code: String,
        amount: String,
    },
    /// Show one entry
    Show { trace_number: String },
}

#[derive(Subcommand)]
enum CycleCommand {
    /// Run a cycle and wait for it (Ctrl-C cancels)
    Start {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Limit the run to these loans
        #[arg(long = "loan")]
        loans: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show a finished run
    Status { run_id: Uuid },
    /// Export a run as json or csv
    Export {
        run_id: Uuid,
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Recompute the hash chain
    Verify,
    /// Audit records for a loan
    Trail {
        loan_id: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = HearthConfig::load(cli.config.as_deref())?;
    if let Some(data) = cli.data {
        config = config.with_data_dir(data);
    }
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Init => {
            let path = commands::init(&ctx)?;
            println!("✅ Initialized {}", ctx.data_dir().display());
            println!("   Config written to {}", path.display());
        }

        Commands::Board {
            loan_id,
            principal,
            rate,
            first_due,
            installment,
            escrow,
            late_fee,
            grace_days,
            date,
        } => {
            let req = BoardRequest {
                loan_id: loan_id.clone(),
                principal: principal.clone(),
                annual_rate: rate,
                first_due_date: first_due,
                monthly_installment: installment,
                monthly_escrow: escrow,
                late_fee,
                late_fee_grace_days: grace_days,
                boarded_on: date.unwrap_or_else(today),
            };
            let event_id = commands::board(&ctx, req)?;
            println!("✅ Boarded {} with principal {} (event: {})", loan_id, principal, event_id);
        }

        Commands::Pay {
            loan_id,
            amount,
            date,
            channel,
            external_ref,
        } => {
            let external_ref = external_ref.unwrap_or_else(|| Uuid::new_v4().to_string());
            let receipt = commands::pay(
                &ctx,
                &loan_id,
                &amount,
                date.unwrap_or_else(today),
                &channel,
                &external_ref,
            )?;
            print_json(&receipt)?;
        }

        Commands::Reverse { event_id, reason } => {
            let reversal = commands::reverse(&ctx, &event_id, &reason)?;
            println!("✅ Reversed {} (reversal: {})", event_id, reversal);
        }

        Commands::Balance { loan_id, as_of } => {
            let balances = commands::balance(&ctx, &loan_id, as_of)?;
            print_json(&balances)?;
        }

        Commands::History { loan_id, from, to } => {
            let events = commands::history(&ctx, &loan_id, from, to)?;
            if events.is_empty() {
                println!("No events for {}", loan_id);
            }
            for event in events {
                println!(
                    "{:>6}  {}  {:<22} {:<38} {}{}",
                    event.sequence,
                    event.business_date,
                    event.event_type.to_string(),
                    event.id.to_string(),
                    event.description,
                    if event.is_reversed { "  [reversed]" } else { "" }
                );
            }
        }

        Commands::Import {
            bank_account_id,
            file,
        } => {
            let report = commands::import_statement(&ctx, &bank_account_id, &file)?;
            println!(
                "✅ Imported {} transactions: {} matched, {} pending",
                report.transactions.len(),
                report.auto_matched,
                report.pending()
            );
            print_json(&report.transactions)?;
        }

        Commands::Recon(cmd) => match cmd {
            ReconCommand::List { status } => {
                print_json(&commands::recon_list(&ctx, status)?)?;
            }
            ReconCommand::Candidates { bank_txn_id } => {
                print_json(&commands::recon_candidates(&ctx, bank_txn_id)?)?;
            }
            ReconCommand::Confirm {
                bank_txn_id,
                event_id,
            } => {
                let txn = commands::recon_confirm(&ctx, bank_txn_id, &event_id)?;
                println!("✅ Matched {} to {}", txn.external_id, event_id);
            }
            ReconCommand::Promote { date } => {
                let raised = commands::recon_promote(&ctx, date.unwrap_or_else(today))?;
                if raised.is_empty() {
                    println!("No stale bank transactions");
                } else {
                    println!("⚠️  Raised {} exceptions", raised.len());
                    print_json(&raised)?;
                }
            }
        },

        Commands::Exception(cmd) => match cmd {
            ExceptionCommand::List {
                state,
                category,
                min_severity,
                loan,
                all,
            } => {
                let filter = ExceptionFilter {
                    state: if all { state } else { state.or(Some(ExceptionState::Open)) },
                    category,
                    min_severity,
                    loan_id: loan.map(LoanId::new),
                    transfer_trace: None,
                };
                print_json(&commands::exception_list(&ctx, &filter)?)?;
            }
            ExceptionCommand::Assign { id, assignee } => {
                commands::exception_assign(&ctx, id, &assignee)?;
                println!("✅ Exception {} assigned to {}", id, assignee);
            }
            ExceptionCommand::Pending { id } => {
                commands::exception_pending(&ctx, id)?;
                println!("✅ Exception {} pending", id);
            }
            ExceptionCommand::Resolve { id, note } => {
                commands::exception_resolve(&ctx, id, &note)?;
                println!("✅ Exception {} resolved", id);
            }
            ExceptionCommand::Cancel { id, reason } => {
                commands::exception_cancel(&ctx, id, &reason)?;
                println!("✅ Exception {} cancelled", id);
            }
        },

        Commands::Transfer(cmd) => match cmd {
            TransferCommand::Submit { file, date } => {
                let batch = commands::transfer_submit(&ctx, &file, date.unwrap_or_else(today))?;
                println!("✅ Batch {} accepted with {} entries", batch.id, batch.entries.len());
                print_json(&batch)?;
            }
            TransferCommand::Send { batch_id } => {
                let ack = commands::transfer_send(&ctx, batch_id).await?;
                println!("✅ Batch {} sent ({})", ack.batch_id, ack.reference);
            }
            TransferCommand::Settle { trace_number, date } => {
                let event_id =
                    commands::transfer_settle(&ctx, &trace_number, date.unwrap_or_else(today))?;
                println!("✅ Settled {} (event: {})", trace_number, event_id);
            }
            TransferCommand::Return {
                trace_number,
                code,
                amount,
            } => {
                let ret = commands::transfer_return(&ctx, &trace_number, &code, &amount)?;
                println!("⚠️  Return recorded for {}", trace_number);
                print_json(&ret)?;
            }
            TransferCommand::Show { trace_number } => {
                print_json(&commands::transfer_show(&ctx, &trace_number)?)?;
            }
        },

        Commands::Cycle(cmd) => match cmd {
            CycleCommand::Start {
                date,
                loans,
                dry_run,
            } => {
                let run =
                    commands::cycle_run(&ctx, date.unwrap_or_else(today), loans, dry_run).await?;
                println!(
                    "✅ Cycle run {} {}: {}/{} loans, {} failed",
                    run.id,
                    run.state,
                    run.processed_loans,
                    run.total_loans,
                    run.failed_loans()
                );
                if let Some(reconciliation) = run.reconciliation {
                    println!(
                        "   planned {} / posted {} ({})",
                        run.planned_total_minor, run.posted_total_minor, reconciliation
                    );
                }
            }
            CycleCommand::Status { run_id } => {
                print_json(&commands::cycle_status(&ctx, run_id)?)?;
            }
            CycleCommand::Export {
                run_id,
                format,
                output,
            } => {
                let body = commands::cycle_export(&ctx, run_id, format)?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, body)?;
                        println!("✅ Exported run {} to {}", run_id, path.display());
                    }
                    None => print!("{}", body),
                }
            }
        },

        Commands::Audit(cmd) => match cmd {
            AuditCommand::Verify => match commands::audit_verify(&ctx) {
                Ok(summary) => {
                    println!("✅ Hash chain verified ({} records)", summary.records);
                    println!("   Head: {}", summary.last_hash);
                }
                Err(e) => {
                    println!("❌ Hash chain broken: {}", e);
                    std::process::exit(1);
                }
            },
            AuditCommand::Trail { loan_id, from, to } => {
                print_json(&commands::audit_trail(&ctx, &loan_id, from, to)?)?;
            }
        },
    }

    Ok(())
}
