//! Contacts demo: one server, one client, one live contact list.
//!
//! Starts a `CollectionServer` over an in-memory store, connects a
//! `RemoteClient` to it and drives a `ContactsSession` through a short
//! script of writes and query edits, printing every published view.
//!
//! `CONTACTS_BIND_ADDR` overrides the listen address (default
//! `127.0.0.1:0`, an ephemeral port). Set `RUST_LOG=debug` to follow the
//! sync traffic.

mod table;

use log::info;
use std::sync::Arc;
use std::time::Duration;

use contacts_core::{ContactDraft, SortField};
use contacts_sync::{
    ClientConfig, CollectionServer, ContactsSession, RemoteClient, RemoteCollection,
    ServerConfig, SessionConfig, SessionView,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:0";

/// Wait for the next published view, giving up quietly after a second.
async fn next_view(rx: &mut tokio::sync::watch::Receiver<SessionView>) -> SessionView {
    let _ = tokio::time::timeout(Duration::from_secs(1), rx.changed()).await;
    rx.borrow_and_update().clone()
}

fn show(step: &str, published: &SessionView) {
    println!("\n── {step} (generation {})", published.generation);
    println!("{}", table::render(published));
    match serde_json::to_string(&published.summary) {
        Ok(json) => log::debug!("summary: {json}"),
        Err(e) => log::warn!("Failed to encode summary: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting contacts demo...");

    let bind_addr =
        std::env::var("CONTACTS_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let server = Arc::new(CollectionServer::in_memory(ServerConfig {
        bind_addr,
        ..ServerConfig::default()
    }));
    let listener = server.bind().await?;
    let addr = listener.local_addr()?;
    let serving = server.clone();
    tokio::spawn(async move {
        if let Err(e) = serving.serve(listener).await {
            log::error!("Server stopped: {e}");
        }
    });

    let mut client = RemoteClient::new(ClientConfig {
        url: format!("ws://{addr}"),
        ..ClientConfig::default()
    });
    client.connect().await?;
    let remote: Arc<dyn RemoteCollection> = Arc::new(client);

    let mut session = ContactsSession::new(
        remote,
        SessionConfig {
            page_size: 2,
            ..SessionConfig::default()
        },
    )?;
    let mut views = session.watch();
    session.start_sync().await?;
    show("initial snapshot", &next_view(&mut views).await);

    for (name, company, role) in [
        ("Ann", "Acme", "PM"),
        ("Bo", "Zen", "Eng"),
        ("Cy", "", ""),
        ("Dee", "Acme", "Eng"),
    ] {
        session.create(ContactDraft::new(name, company, role)).await?;
        show(&format!("created {name}"), &next_view(&mut views).await);
    }

    if let Err(e) = session.create(ContactDraft::new("   ", "Nobody", "")).await {
        println!("\n── rejected blank name: {e}");
    }

    session.next_page();
    show("next page", &session.view());

    session.set_search_term("acme");
    show("search \"acme\"", &session.view());

    session.set_search_term("");
    session.set_role_filter("Eng");
    session.set_sort_field(SortField::Company);
    session.toggle_sort_order();
    show("role Eng, company descending", &session.view());

    let first = session.view().view.records.first().map(|r| r.id);
    if let Some(id) = first {
        // Query edits above already published; wait for the store's answer
        let _ = views.borrow_and_update();
        session.remove(id).await?;
        show("removed first Eng contact", &next_view(&mut views).await);
        if let Err(e) = session.remove(id).await {
            println!("\n── second remove: {e}");
        }
    }

    let summary = session.view().summary;
    println!("\n── role distribution");
    for (role, count) in &summary.role_distribution {
        println!("{role:<10} {count}");
    }

    session.stop_sync().await;
    info!("Server handled {} messages", server.stats().await.total_messages);
    Ok(())
}
