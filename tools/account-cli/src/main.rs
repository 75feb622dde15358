use std::path::{Path, PathBuf};

use alloy_primitives::{Address, U256};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use operation_encoder::{
    register_session_key, revoke_session_key, rotate_owner, set_default_policy, set_entry_gateway,
    set_session_policy, sign_operation, signer_address, UnsignedOperation,
};
use session_account::{AccountConfig, MemoryHost, Outcome, PolicyRef, SmartAccount};
use session_account_types::{Call, OperationRequest, PermissionSet, SessionKeyId, SignerHint};

mod files;

use files::{
    load_account, load_signing_key, now_rfc3339, now_unix, read_json, record_deployments,
    save_account, write_json_atomic,
};

/// Operate a session-key smart account kept in a local state file.
///
/// `deploy` wires the PolicyManager, SessionKeyManager and SmartAccount together the same way
/// the on-chain deployment does and records the component addresses in a deployments JSON.
/// The remaining commands build, sign, simulate and audit operations against that state.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// tracing filter (eg `info`, `session_account=debug`).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Account state file.
    #[arg(long, default_value = "account.state.json", global = true)]
    state_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Path to a file containing the private key.
    #[arg(long, env = "PRIV_KEY_PATH", conflicts_with = "private_key")]
    private_key_path: Option<PathBuf>,

    /// Private key (hex string, 0x...).
    #[arg(long, env = "PKEY", conflicts_with = "private_key_path")]
    private_key: Option<String>,
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Entry gateway allowed to submit operations.
    #[arg(long, env = "ENTRYPOINT_ADDRESS")]
    entry_point: Address,

    /// Account owner. Defaults to the deployer key's address.
    #[arg(long, env = "OWNER_ADDRESS")]
    owner: Option<Address>,

    #[arg(long, env = "CHAIN_ID", default_value_t = 421614)]
    chain_id: u64,

    #[command(flatten)]
    key: KeyArgs,

    /// Path to write deployment info (eg, deployments.devnet.json).
    #[arg(long, default_value = "deployments.devnet.json")]
    deployments_path: PathBuf,

    #[arg(long, default_value = "arbitrumSepolia")]
    network: String,

    /// Overwrite an existing state file.
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the account and its two managers, then record their addresses.
    Deploy(DeployArgs),

    /// Print owner, gateway, nonces, session keys and spend headroom.
    Inspect {
        /// Evaluate windows at this unix time instead of now.
        #[arg(long)]
        at: Option<u64>,
    },

    /// Append an administrative self-call to a calls file.
    Admin {
        /// Calls file (JSON array); created if missing.
        #[arg(long, default_value = "calls.json")]
        calls_path: PathBuf,

        #[command(subcommand)]
        action: AdminAction,
    },

    /// Sign a batch of calls into an operation request.
    Sign {
        /// Calls file (JSON array of `{ target, value, data }`).
        #[arg(long, default_value = "calls.json")]
        calls_path: PathBuf,

        /// Sign as this session key instead of the owner.
        #[arg(long)]
        session_key: Option<u64>,

        /// Override the nonce (defaults to the signer's next nonce).
        #[arg(long)]
        nonce: Option<U256>,

        #[command(flatten)]
        key: KeyArgs,

        #[arg(long, default_value = "operation.json")]
        out: PathBuf,
    },

    /// Submit a signed request against an in-memory host and persist the outcome.
    Submit {
        #[arg(long, default_value = "operation.json")]
        request_path: PathBuf,

        /// Submitting address. Defaults to the configured entry gateway.
        #[arg(long)]
        caller: Option<Address>,

        /// Block timestamp to simulate. Defaults to now.
        #[arg(long)]
        timestamp: Option<u64>,

        /// Native balance the simulated account starts with.
        #[arg(long, default_value = "0")]
        account_balance: U256,
    },

    /// Print the audit log.
    Audit {
        /// Only the last N events.
        #[arg(long)]
        limit: Option<usize>,

        /// Emit JSON instead of one line per event.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AdminAction {
    RotateOwner {
        new_owner: Address,
    },
    SetEntryGateway {
        gateway: Address,
    },
    RegisterSessionKey {
        signer: Address,
        /// Permission set JSON (`{ rules: [...], deny: [...] }`).
        #[arg(long)]
        permissions: PathBuf,
        #[arg(long)]
        valid_from: Option<u64>,
        #[arg(long)]
        valid_until: u64,
    },
    RevokeSessionKey {
        id: u64,
    },
    SetDefaultPolicy {
        #[arg(long)]
        permissions: PathBuf,
    },
    SetSessionPolicy {
        id: u64,
        #[arg(long)]
        permissions: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Command::Deploy(args) => deploy(&cli.state_path, args),
        Command::Inspect { at } => inspect(&cli.state_path, at.unwrap_or_else(now_unix)),
        Command::Admin { calls_path, action } => admin(&cli.state_path, &calls_path, action),
        Command::Sign {
            calls_path,
            session_key,
            nonce,
            key,
            out,
        } => sign(&cli.state_path, &calls_path, session_key, nonce, &key, &out),
        Command::Submit {
            request_path,
            caller,
            timestamp,
            account_balance,
        } => submit(
            &cli.state_path,
            &request_path,
            caller,
            timestamp.unwrap_or_else(now_unix),
            account_balance,
        ),
        Command::Audit { limit, json } => audit(&cli.state_path, limit, json),
    }
}

fn deploy(state_path: &Path, args: DeployArgs) -> Result<()> {
    if state_path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to replace it",
            state_path.display()
        );
    }
    if args.entry_point == Address::ZERO {
        bail!("ENTRYPOINT_ADDRESS is required");
    }

    let deployer_key = load_signing_key(
        args.key.private_key_path.as_deref(),
        args.key.private_key.as_deref(),
    )?;
    let deployer = signer_address(&deployer_key);
    let owner = args.owner.unwrap_or(deployer);

    println!("Deployer: {deployer}");
    println!("Owner: {owner}");
    println!("EntryPoint: {}", args.entry_point);

    // Same deployment order as on-chain: the two managers first, then the account.
    let policy_manager = deployer.create(0);
    let session_key_manager = deployer.create(1);
    let account = SmartAccount::new(AccountConfig {
        address: deployer.create(2),
        chain_id: args.chain_id,
        owner,
        entry_gateway: args.entry_point,
        policy_manager,
        session_key_manager,
    });
    save_account(state_path, &account)?;

    let deployed_at = now_rfc3339();
    let entry = |address: Address| json!({ "address": address, "deployed_at": deployed_at });
    let mut smart_account = entry(account.address());
    smart_account["owner"] = json!(owner);
    smart_account["entry_point"] = json!(args.entry_point);
    smart_account["chain_id"] = json!(args.chain_id);
    record_deployments(
        &args.deployments_path,
        &args.network,
        &[
            ("policy-manager", entry(policy_manager)),
            ("session-key-manager", entry(session_key_manager)),
            ("smart-account", smart_account),
        ],
    )?;
    info!(state = %state_path.display(), deployments = %args.deployments_path.display(), "deployed");

    println!("PolicyManager: {policy_manager}");
    println!("SessionKeyManager: {session_key_manager}");
    println!("SmartAccount: {}", account.address());
    Ok(())
}

fn inspect(state_path: &Path, now: u64) -> Result<()> {
    let account = load_account(state_path)?;
    let config = account.config();

    println!("SmartAccount: {}", config.address);
    println!("Chain id: {}", config.chain_id);
    println!("Owner: {}", config.owner);
    println!("EntryPoint: {}", config.entry_gateway);
    println!("PolicyManager: {}", config.policy_manager);
    println!("SessionKeyManager: {}", config.session_key_manager);
    println!("Owner nonce: {}", account.next_nonce(SignerHint::Owner));
    print_policy(&account, PolicyRef::Default, now);

    let keys = account.session_keys().keys();
    if keys.is_empty() {
        println!("No session keys");
    }
    for key in keys {
        let state = if key.is_revoked() {
            "revoked"
        } else if key.is_live(now) {
            "active"
        } else {
            "outside validity"
        };
        println!(
            "Session key {}: {} [{}, {}) {} nonce {}",
            key.id,
            key.signer,
            key.valid_from,
            key.valid_until,
            state,
            account.next_nonce(SignerHint::SessionKey(key.id)),
        );
        print_policy(&account, PolicyRef::SessionKey(key.id), now);
    }
    Ok(())
}

fn print_policy(account: &SmartAccount, policy_ref: PolicyRef, now: u64) {
    let Some(policy) = account.policies().policy(policy_ref) else {
        return;
    };
    let permissions = policy.permissions();
    println!(
        "  policy {:?}: {} rule(s), {} deny entr(ies)",
        policy_ref,
        permissions.rules.len(),
        permissions.deny.len()
    );
    for (index, rule) in permissions.rules.iter().enumerate() {
        let headroom = match account.remaining_in_period(policy_ref, index, now) {
            Some(remaining) => format!("remaining {remaining}"),
            None => "uncapped".to_string(),
        };
        println!(
            "    rule {index}: {:?} / {:?} {headroom}",
            rule.target, rule.selector
        );
    }
}

fn read_permissions(path: &Path) -> Result<PermissionSet> {
    read_json(path).context("permission set must be JSON `{ \"rules\": [...], \"deny\": [...] }`")
}

fn admin(state_path: &Path, calls_path: &Path, action: AdminAction) -> Result<()> {
    let account = load_account(state_path)?;
    let address = account.address();

    let call = match action {
        AdminAction::RotateOwner { new_owner } => rotate_owner(address, new_owner),
        AdminAction::SetEntryGateway { gateway } => set_entry_gateway(address, gateway),
        AdminAction::RegisterSessionKey {
            signer,
            permissions,
            valid_from,
            valid_until,
        } => register_session_key(
            address,
            signer,
            &read_permissions(&permissions)?,
            valid_from.unwrap_or_else(now_unix),
            valid_until,
        ),
        AdminAction::RevokeSessionKey { id } => revoke_session_key(address, SessionKeyId(id)),
        AdminAction::SetDefaultPolicy { permissions } => {
            set_default_policy(address, &read_permissions(&permissions)?)
        }
        AdminAction::SetSessionPolicy { id, permissions } => {
            set_session_policy(address, SessionKeyId(id), &read_permissions(&permissions)?)
        }
    };

    let mut calls: Vec<Call> = if calls_path.exists() {
        read_json(calls_path)?
    } else {
        Vec::new()
    };
    calls.push(call);
    write_json_atomic(calls_path, &calls)?;
    println!("{} call(s) in {}", calls.len(), calls_path.display());
    Ok(())
}

fn sign(
    state_path: &Path,
    calls_path: &Path,
    session_key: Option<u64>,
    nonce: Option<U256>,
    key: &KeyArgs,
    out: &Path,
) -> Result<()> {
    let account = load_account(state_path)?;
    let calls: Vec<Call> = read_json(calls_path)?;
    if calls.is_empty() {
        bail!("{} holds no calls", calls_path.display());
    }

    let signing_key = load_signing_key(key.private_key_path.as_deref(), key.private_key.as_deref())?;
    let signer = match session_key {
        Some(id) => SignerHint::SessionKey(SessionKeyId(id)),
        None => SignerHint::Owner,
    };
    if signer == SignerHint::Owner && signer_address(&signing_key) != account.owner() {
        warn!(
            key = %signer_address(&signing_key),
            owner = %account.owner(),
            "signing key is not the current owner"
        );
    }

    let op = UnsignedOperation {
        domain: account.domain(),
        signer,
        nonce: nonce.unwrap_or_else(|| account.next_nonce(signer)),
        calls,
    };
    let request = sign_operation(op, &signing_key).map_err(|err| anyhow!("signing failed: {err}"))?;
    write_json_atomic(out, &request)?;

    println!("Digest: {}", account.operation_digest(&request));
    println!("Nonce: {}", request.nonce);
    println!("Wrote {}", out.display());
    Ok(())
}

fn submit(
    state_path: &Path,
    request_path: &Path,
    caller: Option<Address>,
    timestamp: u64,
    account_balance: U256,
) -> Result<()> {
    let mut account = load_account(state_path)?;
    let request: OperationRequest = read_json(request_path)?;

    let mut host = MemoryHost::new(timestamp);
    host.fund(account.address(), account_balance);
    let caller = caller.unwrap_or_else(|| account.entry_gateway());

    let outcome = account.submit(caller, &request, &mut host);
    // Rejections are recorded in the audit log, so the state is saved either way.
    save_account(state_path, &account)?;

    match outcome {
        Ok(result) => {
            println!("Executed {} call(s)", result.returns.len());
            println!("Digest: {}", result.digest);
            println!("Signer: {:?}", result.signer);
            Ok(())
        }
        Err(rejection) => Err(anyhow!("rejected ({}): {rejection}", rejection.code())),
    }
}

fn audit(state_path: &Path, limit: Option<usize>, as_json: bool) -> Result<()> {
    let account = load_account(state_path)?;
    let events = account.audit_log().events();
    let skip = limit.map_or(0, |limit| events.len().saturating_sub(limit));
    let events = &events[skip..];

    if as_json {
        println!("{}", serde_json::to_string_pretty(events)?);
        return Ok(());
    }
    for event in events {
        let outcome = match event.outcome {
            Outcome::Accepted => "accepted",
            Outcome::Rejected => "rejected",
        };
        print!(
            "#{} t={} {outcome} {:?} by {:?} digest {}",
            event.sequence, event.timestamp, event.kind, event.signer, event.operation_digest
        );
        match &event.reason_code {
            Some(code) => println!(" reason {code}"),
            None => println!(),
        }
    }
    Ok(())
}
