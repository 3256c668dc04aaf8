use anyhow::Context;
use reviewtree_core::CollectionsClient;
use reviewtree_sync::SyncCoordinator;
use reviewtree_sync::config::SyncConfig;
use reviewtree_sync::store::tree::{NodeKind, TreeNode};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Show,
    Reconcile,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Show;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--reconcile" => mode = CliMode::Reconcile,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: reviewtree-sync [--reconcile]");
        println!("  (default)     Load the tree and file records and print the tree");
        println!("  --reconcile   Recreate missing file records and delete orphaned ones");
        return Ok(());
    }
    init_logging();

    let config = SyncConfig::from_env()?;
    let client = match &config.api_token {
        Some(token) => CollectionsClient::with_token(&config.api_url, token.clone()),
        None => CollectionsClient::new(&config.api_url),
    }
    .context("invalid REVIEWTREE_API_URL")?;
    let coordinator = SyncCoordinator::new(client, config.scope.clone())
        .with_collections(config.collections.clone());

    let nodes = coordinator
        .load_tree()
        .await
        .context("failed to load tree document")?;
    let files = coordinator
        .load_files()
        .await
        .context("failed to load file records")?;
    info!(
        project = %config.scope.project_id,
        version = %config.scope.version_id,
        nodes,
        files,
        "scope loaded"
    );

    if mode == CliMode::Reconcile {
        let report = coordinator.reconcile().await?;
        println!(
            "created {} rebound {} removed {} failed {}",
            report.created, report.rebound, report.removed, report.failed
        );
    } else {
        let mut out = String::new();
        render_tree(&coordinator.tree_snapshot().await, 0, &mut out);
        print!("{out}");
    }
    Ok(())
}

fn render_tree(node: &TreeNode, depth: usize, out: &mut String) {
    for child in node.children.iter().flatten() {
        let marker = match child.kind {
            NodeKind::Folder => "/",
            NodeKind::File => "",
        };
        out.push_str(&format!("{}{}{marker}\n", "  ".repeat(depth), child.name));
        render_tree(child, depth + 1, out);
    }
}
