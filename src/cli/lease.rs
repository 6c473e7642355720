use super::commands::{ClientArgs, LeaseCommands};
use super::http_client::ApiClient;
use crate::server::dto::{Ack, AcquireLeaseRequest, CommitLeaseRequest, LeaseHandle};
use crate::types::LeaseView;

pub fn run_lease(args: &ClientArgs, command: LeaseCommands) -> anyhow::Result<()> {
    let client = ApiClient::new(args)?;

    match command {
        LeaseCommands::Acquire {
            repository,
            path,
            quiet,
        } => run_lease_acquire(&client, repository, path, quiet),
        LeaseCommands::Commit { token, payload } => run_lease_commit(&client, &token, payload),
        LeaseCommands::Cancel { token } => run_lease_cancel(&client, &token),
        LeaseCommands::Show { token, json } => run_lease_show(&client, &token, json),
        LeaseCommands::List { repository, json } => run_lease_list(&client, repository, json),
    }
}

fn run_lease_acquire(
    client: &ApiClient,
    repository: String,
    path: String,
    quiet: bool,
) -> anyhow::Result<()> {
    let handle: LeaseHandle = client.post("/leases", &AcquireLeaseRequest { repository, path })?;

    if quiet {
        println!("{}", handle.token);
        return Ok(());
    }

    println!();
    println!("Acquired lease on {}:{}", handle.repository, handle.path);
    println!("  Token:   {}", handle.token);
    println!("  Owner:   {}", handle.owner);
    println!(
        "  Expires: {}",
        handle.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    Ok(())
}

fn run_lease_commit(client: &ApiClient, token: &str, payload_ref: String) -> anyhow::Result<()> {
    let _ack: Ack = client.post(&format!("/leases/{token}"), &CommitLeaseRequest { payload_ref })?;
    println!("Committed lease {token}");
    Ok(())
}

fn run_lease_cancel(client: &ApiClient, token: &str) -> anyhow::Result<()> {
    let _ack: Ack = client.delete(&format!("/leases/{token}"))?;
    println!("Cancelled lease {token}");
    Ok(())
}

fn run_lease_show(client: &ApiClient, token: &str, json: bool) -> anyhow::Result<()> {
    let lease: LeaseView = client.get(&format!("/leases/{token}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&lease)?);
        return Ok(());
    }

    print_lease(&lease);
    Ok(())
}

fn run_lease_list(client: &ApiClient, repository: Option<String>, json: bool) -> anyhow::Result<()> {
    let path = match &repository {
        Some(repo) => format!("/leases?repository={repo}"),
        None => "/leases".to_string(),
    };
    let leases: Vec<LeaseView> = client.get(&path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&leases)?);
        return Ok(());
    }

    if leases.is_empty() {
        println!("No outstanding leases");
        return Ok(());
    }
    for lease in &leases {
        print_lease(lease);
    }
    Ok(())
}

fn print_lease(lease: &LeaseView) {
    println!(
        "{}:{}  {}  {}  expires {}",
        lease.repository,
        lease.path,
        lease.owner,
        lease.state,
        lease.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}
