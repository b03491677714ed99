//! Subcommand handlers

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use passbook_client::{AccessParams, CancelToken, LifecycleEvent, Passbook};
use passbook_core::{PassbookConfig, SessionId, TicketId};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

pub(crate) async fn run(config: PassbookConfig, matches: &ArgMatches) -> Result<()> {
    let session = session_arg(matches)?;
    let passbook = Passbook::open(config).context("failed to open passbook")?;

    match matches.subcommand() {
        Some(("redeem", args)) => redeem(&passbook, args).await,
        Some(("access", args)) => access(&passbook, session, args).await,
        Some(("renew", _)) => renew(&passbook, session).await,
        Some(("split", args)) => split(&passbook, args).await,
        Some(("status", _)) => status(&passbook, session),
        Some(("export", args)) => export(&passbook, args),
        Some(("import", args)) => import(&passbook, args),
        Some(("watch", _)) => watch(&passbook).await,
        _ => bail!("unknown command"),
    }
}

fn session_arg(matches: &ArgMatches) -> Result<Option<SessionId>> {
    matches
        .get_one::<String>("session")
        .map(|raw| raw.parse::<SessionId>().context("invalid --session"))
        .transpose()
}

fn require_session(session: Option<SessionId>) -> Result<SessionId> {
    session.context("--session is required for this command")
}

async fn redeem(passbook: &Passbook, args: &ArgMatches) -> Result<()> {
    let code = args
        .get_one::<String>("code")
        .context("missing redemption code")?;
    let progress = |message: &str, percent: u8| eprintln!("[{percent:>3}%] {message}");

    let outcome = passbook.redeem(code, &progress).await?;
    println!("Redeemed {} tickets", outcome.tickets_issued);
    Ok(())
}

async fn access(passbook: &Passbook, session: Option<SessionId>, args: &ArgMatches) -> Result<()> {
    let session = session.unwrap_or_default();
    let mut params = AccessParams::new(session);
    if let Some(raw) = args.get_one::<String>("ticket") {
        let id: TicketId = raw.parse().context("invalid --ticket")?;
        params = params.with_ticket(id);
    }
    if let Some(scope) = args.get_one::<String>("scope") {
        params = params.with_scope(scope.clone());
    }
    if let Some(required) = args.get_one::<u32>("required") {
        params = params.with_required_tickets(*required);
    }

    let (credential, grant) = passbook.request_access(params).await?;
    if !grant.spent.is_empty() {
        eprintln!(
            "{} ticket(s) were already used elsewhere and have been archived",
            grant.spent.len()
        );
    }
    warn_if_unsaved(passbook);
    println!("session:      {session}");
    println!("token:        {}", credential.token);
    println!("credit limit: {}", credential.info.credit_limit);
    println!("expires at:   {}", credential.expires_at.to_rfc3339());
    Ok(())
}

async fn renew(passbook: &Passbook, session: Option<SessionId>) -> Result<()> {
    let session = require_session(session)?;
    let credential = passbook.lifecycle().renew(&session).await?;
    warn_if_unsaved(passbook);
    println!("token:      {}", credential.token);
    println!("expires at: {}", credential.expires_at.to_rfc3339());
    Ok(())
}

fn warn_if_unsaved(passbook: &Passbook) {
    if passbook.lifecycle().has_unsaved_changes() {
        eprintln!("warning: the credential could not be saved and is only held by this process");
    }
}

async fn split(passbook: &Passbook, args: &ArgMatches) -> Result<()> {
    let count = *args.get_one::<usize>("count").context("missing count")?;
    let outcome = passbook.split(count).await?;
    if !outcome.spent.is_empty() {
        eprintln!(
            "{} ticket(s) were already used elsewhere and have been archived",
            outcome.spent.len()
        );
    }
    println!("{}", outcome.code.grouped());
    eprintln!("{} tickets folded into the code", outcome.tickets_consumed);
    Ok(())
}

fn status(passbook: &Passbook, session: Option<SessionId>) -> Result<()> {
    let count = passbook.count();
    println!("ready tickets:    {}", count.active);
    println!("archived tickets: {}", count.archived);
    println!("largest split:    {}", passbook.max_split());

    let lifecycle = passbook.lifecycle();
    lifecycle.tick();
    if let Some(session) = session {
        match lifecycle.view(&session) {
            Some(view) => {
                println!("credential:       {} ({:?})", view.fingerprint, view.status);
                println!("time remaining:   {}s", view.remaining.as_secs());
                println!("shared by:        {} session(s)", view.shared_count);
            }
            None => println!("credential:       none for session {session}"),
        }
    } else {
        println!("credentials:      {}", lifecycle.credentials().len());
    }
    Ok(())
}

fn export(passbook: &Passbook, args: &ArgMatches) -> Result<()> {
    let output = args.get_one::<PathBuf>("output");
    if args.get_flag("transfer") {
        let path = output.context("--transfer needs --output")?;
        let transfer = passbook.begin_transfer()?;
        std::fs::write(path, transfer.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        let removed = transfer.confirm()?;
        eprintln!("Moved {removed} tickets to {}", path.display());
        return Ok(());
    }

    let json = passbook.export_json()?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn import(passbook: &Passbook, args: &ArgMatches) -> Result<()> {
    let path = args.get_one::<PathBuf>("file").context("missing file")?;
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let summary = passbook.import_json(&json)?;
    println!(
        "added {} ready, {} archived; {} duplicates ({} updated)",
        summary.added_active, summary.added_archived, summary.duplicates, summary.advanced
    );
    Ok(())
}

async fn watch(passbook: &Passbook) -> Result<()> {
    let mut events = passbook.lifecycle().subscribe();
    let cancel = CancelToken::new();
    let ticker = passbook.start_ticker(cancel.clone());
    eprintln!("Watching {} credential(s); Ctrl-C to stop", passbook.lifecycle().credentials().len());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(LifecycleEvent::Expired { credential }) => println!("expired  {credential}"),
                Ok(LifecycleEvent::Renewed { previous, current }) => println!("renewed  {previous} -> {current}"),
                Ok(LifecycleEvent::Tracked { credential }) => println!("tracked  {credential}"),
                Ok(LifecycleEvent::Cleared { credential }) => println!("cleared  {credential}"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Missed lifecycle events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    ticker.await.context("expiry ticker panicked")?;
    Ok(())
}
