use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use referral_core::{
    accounts::RegisterRequest,
    api::{ApiResponse, ReferralApi, StaticTokens},
    config::DEFAULT_FRONTEND_URL,
    investments::DepositRequest,
    ledger::{LedgerLock, LedgerStore, MemoryStore, SharedLedger},
    model::{Amount, InvestmentStatus, PaymentMethod},
    withdrawals::WithdrawalRequest,
    ServiceConfig,
};

//==================== CLI ====================//

/// Operates a referral ledger file. Amounts are in cents.
#[derive(Parser)]
#[command(name = "referral", version, about)]
struct Cli {
    /// Ledger snapshot; created on the first write.
    #[arg(long, global = true, env = "REFERRAL_STORE", default_value = "referral-ledger.json")]
    store: PathBuf,

    /// JSON object mapping bearer tokens to user ids.
    #[arg(long, global = true, env = "REFERRAL_TOKENS", default_value = "tokens.json")]
    tokens: PathBuf,

    #[arg(long, global = true, env = "FRONTEND_URL", default_value = DEFAULT_FRONTEND_URL)]
    frontend_url: String,

    /// Bearer token for user commands.
    #[arg(long, global = true, env = "REFERRAL_BEARER")]
    bearer: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account, optionally under a referral code.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: String,
        #[arg(long = "ref")]
        referral_code: Option<String>,
    },
    Profile,
    /// Three-level downline of the bearer.
    Tree,
    Commissions,
    Stats,
    /// Confirm a deposit and pay the upstream chain.
    Invest {
        #[arg(long)]
        amount: Amount,
        #[arg(long, value_parser = parse_payment_method)]
        method: Option<PaymentMethod>,
        #[arg(long)]
        tx_hash: Option<String>,
    },
    Investments,
    CompleteInvestment {
        investment_id: String,
    },
    CancelInvestment {
        investment_id: String,
    },
    /// Post any commission levels the investment is missing.
    ReprocessInvestment {
        investment_id: String,
    },
    Withdraw {
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        wallet: String,
    },
    Withdrawals,
    CheckEligibility,
    CancelWithdrawal {
        withdrawal_id: String,
    },
    CompleteWithdrawal {
        withdrawal_id: String,
    },
}

impl Command {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Command::Register { .. }
                | Command::Invest { .. }
                | Command::CompleteInvestment { .. }
                | Command::CancelInvestment { .. }
                | Command::ReprocessInvestment { .. }
                | Command::Withdraw { .. }
                | Command::CancelWithdrawal { .. }
                | Command::CompleteWithdrawal { .. }
        )
    }
}

fn parse_payment_method(s: &str) -> Result<PaymentMethod, String> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
        .map_err(|_| format!("unknown payment method {s:?} (crypto, bank, card, other)"))
}

//==================== dispatch ====================//

fn dispatch(api: &ReferralApi<MemoryStore>, auth: Option<&str>, command: Command) -> ApiResponse {
    match command {
        Command::Register {
            username,
            email,
            password,
            full_name,
            referral_code,
        } => api.register(RegisterRequest {
            username,
            email,
            password,
            full_name,
            referral_code,
        }),
        Command::Profile => api.profile(auth),
        Command::Tree => api.referral_tree(auth),
        Command::Commissions => api.commissions(auth),
        Command::Stats => api.referral_stats(auth),
        Command::Invest {
            amount,
            method,
            tx_hash,
        } => api.confirm_deposit(
            auth,
            DepositRequest {
                amount,
                payment_method: method,
                transaction_hash: tx_hash,
            },
        ),
        Command::Investments => api.investments(auth),
        Command::CompleteInvestment { investment_id } => {
            api.set_investment_status(&investment_id, InvestmentStatus::Completed)
        }
        Command::CancelInvestment { investment_id } => {
            api.set_investment_status(&investment_id, InvestmentStatus::Cancelled)
        }
        Command::ReprocessInvestment { investment_id } => api.reprocess_investment(&investment_id),
        Command::Withdraw { amount, wallet } => api.request_withdrawal(
            auth,
            WithdrawalRequest {
                amount,
                wallet_address: wallet,
            },
        ),
        Command::Withdrawals => api.withdrawals(auth),
        Command::CheckEligibility => api.check_eligibility(auth),
        Command::CancelWithdrawal { withdrawal_id } => api.cancel_withdrawal(auth, &withdrawal_id),
        Command::CompleteWithdrawal { withdrawal_id } => api.complete_withdrawal(&withdrawal_id),
    }
}

fn run(cli: Cli) -> Result<ApiResponse> {
    let mutates = cli.command.mutates();
    // Held from load to save so concurrent writers cannot drop each other's records.
    let mut lock = if mutates {
        let lock = LedgerLock::open(&cli.store)
            .with_context(|| format!("opening lock for {}", cli.store.display()))?;
        Some(lock)
    } else {
        None
    };
    let _guard = match lock.as_mut() {
        Some(lock) => Some(
            lock.exclusive()
                .with_context(|| format!("locking {}", cli.store.display()))?,
        ),
        None => None,
    };

    let store = MemoryStore::load_or_default(&cli.store)
        .with_context(|| format!("loading ledger {}", cli.store.display()))?;
    let tokens = StaticTokens::from_file_or_empty(&cli.tokens)
        .with_context(|| format!("loading tokens {}", cli.tokens.display()))?;
    tracing::debug!(
        store = %cli.store.display(),
        height = store.meta().height,
        tokens = tokens.len(),
        "ledger loaded"
    );

    let config = ServiceConfig::default().with_frontend_url(cli.frontend_url);
    let api = ReferralApi::new(SharedLedger::new(store), tokens, config);
    let header = cli.bearer.map(|token| format!("Bearer {token}"));

    let response = dispatch(&api, header.as_deref(), cli.command);

    if mutates && response.is_success() {
        let store = api
            .into_ledger()
            .into_inner()
            .context("reclaiming ledger")?;
        store
            .save(&cli.store)
            .with_context(|| format!("saving ledger {}", cli.store.display()))?;
        tracing::info!(
            store = %cli.store.display(),
            height = store.meta().height,
            "ledger saved"
        );
    }
    Ok(response)
}

/// 0 on a success envelope, 1 on an error envelope, 2 when the command
/// could not run at all.
fn exit_status(outcome: &Result<ApiResponse>) -> u8 {
    match outcome {
        Ok(response) if response.is_success() => 0,
        Ok(_) => 1,
        Err(_) => 2,
    }
}

//==================== main ====================//

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let outcome = run(Cli::parse());
    match &outcome {
        Ok(response) => match serde_json::to_string_pretty(&response.body) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("error: cannot render response: {err}"),
        },
        Err(err) => eprintln!("error: {err:#}"),
    }
    ExitCode::from(exit_status(&outcome))
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    /// Store and token paths unique to one test.
    struct Workspace {
        dir: PathBuf,
    }

    impl Workspace {
        fn new(tag: &str) -> Self {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            let dir = std::env::temp_dir().join(format!(
                "referral-cli-{tag}-{}-{nanos}",
                std::process::id()
            ));
            fs::create_dir_all(&dir).unwrap();
            Self { dir }
        }

        fn store(&self) -> PathBuf {
            self.dir.join("ledger.json")
        }

        fn tokens(&self) -> PathBuf {
            self.dir.join("tokens.json")
        }

        fn run(&self, args: &[&str]) -> (u8, Option<ApiResponse>) {
            let store = self.store();
            let tokens = self.tokens();
            let mut argv = vec![
                "referral",
                "--store",
                store.to_str().unwrap(),
                "--tokens",
                tokens.to_str().unwrap(),
            ];
            argv.extend_from_slice(args);
            let outcome = run(Cli::try_parse_from(argv).unwrap());
            (exit_status(&outcome), outcome.ok())
        }

        /// Registers `name` and maps the token `tok-<name>` to the new id.
        fn join(&self, name: &str, code: Option<&str>) -> String {
            let email = format!("{name}@example.com");
            let full_name = format!("{name} tester");
            let mut args = vec![
                "register",
                "--username",
                name,
                "--email",
                email.as_str(),
                "--password",
                "secret1",
                "--full-name",
                full_name.as_str(),
            ];
            if let Some(code) = code {
                args.extend_from_slice(&["--ref", code]);
            }
            let (status, response) = self.run(&args);
            assert_eq!(status, 0);
            let user = response.unwrap().body["data"]["user"].clone();

            let mut table: serde_json::Map<String, serde_json::Value> =
                fs::read(self.tokens())
                    .ok()
                    .map(|raw| serde_json::from_slice(&raw).unwrap())
                    .unwrap_or_default();
            table.insert(format!("tok-{name}"), user["id"].clone());
            fs::write(self.tokens(), serde_json::to_vec(&table).unwrap()).unwrap();
            user["referralCode"].as_str().unwrap().to_string()
        }

        fn snapshot(&self) -> Vec<u8> {
            fs::read(self.store()).unwrap()
        }
    }

    impl Drop for Workspace {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn exists(path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    #[test]
    fn register_creates_the_store() {
        let ws = Workspace::new("register");
        assert!(!exists(&ws.store()));
        ws.join("alice", None);
        assert!(exists(&ws.store()));

        let again = MemoryStore::load(&ws.store()).unwrap();
        assert_eq!(again.meta().height, 1);
    }

    #[test]
    fn reads_leave_the_store_untouched() {
        let ws = Workspace::new("reads");
        ws.join("alice", None);
        let before = ws.snapshot();

        let (status, response) = ws.run(&["--bearer", "tok-alice", "profile"]);
        assert_eq!(status, 0);
        assert_eq!(response.unwrap().body["data"]["user"]["username"], "alice");
        let (status, response) = ws.run(&["tree"]);
        assert_eq!(status, 1);
        assert_eq!(response.unwrap().status, 401);
        let (status, _) = ws.run(&["--bearer", "tok-alice", "check-eligibility"]);
        assert_eq!(status, 0);

        assert_eq!(ws.snapshot(), before);
    }

    #[test]
    fn failed_writes_leave_the_store_untouched() {
        let ws = Workspace::new("failed");
        ws.join("alice", None);
        let before = ws.snapshot();

        let (status, response) = ws.run(&["--bearer", "tok-alice", "invest", "--amount", "100"]);
        assert_eq!(status, 1);
        assert_eq!(response.unwrap().status, 400);
        let (status, response) = ws.run(&["complete-withdrawal", "wdr_missing"]);
        assert_eq!(status, 1);
        assert_eq!(response.unwrap().status, 404);

        assert_eq!(ws.snapshot(), before);
    }

    #[test]
    fn unreadable_store_exits_with_two() {
        let ws = Workspace::new("garbage");
        fs::write(ws.store(), b"not a ledger").unwrap();
        let (status, response) = ws.run(&["tree"]);
        assert_eq!(status, 2);
        assert!(response.is_none());
        assert_eq!(ws.snapshot(), b"not a ledger");
    }

    #[test]
    fn concurrent_invocations_keep_every_deposit() {
        let ws = Workspace::new("concurrent");
        let code = ws.join("alice", None);
        ws.join("bobby", Some(&code));

        const RUNS: usize = 4;
        std::thread::scope(|scope| {
            for _ in 0..RUNS {
                scope.spawn(|| {
                    let (status, _) =
                        ws.run(&["--bearer", "tok-bobby", "invest", "--amount", "10000"]);
                    assert_eq!(status, 0);
                });
            }
        });

        let (status, response) = ws.run(&["--bearer", "tok-bobby", "investments"]);
        assert_eq!(status, 0);
        let body = response.unwrap().body;
        assert_eq!(body["data"]["investments"].as_array().unwrap().len(), RUNS);
        let (_, response) = ws.run(&["--bearer", "tok-alice", "stats"]);
        let stats = response.unwrap().body["data"]["stats"].clone();
        assert_eq!(stats["totalReferralEarnings"], 1_200 * RUNS as u64);
        assert_eq!(stats["directSales"], 10_000 * RUNS as u64);
    }
}
