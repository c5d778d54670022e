//! App subcommands: deploy, delete, inspect

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;

use kapply::config::{Config, ConfigLoader};
use kapply::kube::{KubeStore, create_client};
use kapply::resources::{ResourceFilter, parse_manifest, read_manifest_files};
use kapply::services::render_plan;
use kapply::{AppService, EventSink};

/// App identity shared by all app subcommands
#[derive(ClapArgs, Debug)]
pub struct AppArgs {
    /// App name
    #[arg(long = "app", short = 'a')]
    pub name: String,
    /// Namespace holding the app record
    #[arg(long, short = 'n', default_value = "default")]
    pub namespace: String,
}

/// Restrict which resources are considered
#[derive(ClapArgs, Debug, Default)]
pub struct FilterArgs {
    /// Only resources of these kinds
    #[arg(long = "filter-kind", value_delimiter = ',')]
    pub kinds: Vec<String>,
    /// Skip resources of these kinds
    #[arg(long = "exclude-kind", value_delimiter = ',')]
    pub exclude_kinds: Vec<String>,
    /// Only resources in these namespaces
    #[arg(long = "filter-ns", value_delimiter = ',')]
    pub namespaces: Vec<String>,
}

impl FilterArgs {
    fn into_filter(self) -> ResourceFilter {
        ResourceFilter {
            kinds: self.kinds,
            exclude_kinds: self.exclude_kinds,
            namespaces: self.namespaces,
            ..ResourceFilter::default()
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub app: AppArgs,
    /// Manifest file or directory (repeatable)
    #[arg(long = "file", short = 'f')]
    pub files: Vec<PathBuf>,
    /// Inline manifest
    #[arg(long)]
    pub yaml: Option<String>,
    /// Allow an empty manifest to delete every resource of the app
    #[arg(long)]
    pub allow_empty: bool,
    /// Show the changes without applying them
    #[arg(long)]
    pub diff_only: bool,
    /// Do not wait for resources to converge
    #[arg(long)]
    pub no_wait: bool,
    #[command(flatten)]
    pub filter: FilterArgs,
}

pub async fn deploy(args: DeployArgs) -> Result<()> {
    if args.files.is_empty() && args.yaml.is_none() {
        anyhow::bail!("Expected at least one manifest (--file or --yaml)");
    }

    let mut resources = read_manifest_files(&args.files)?;
    if let Some(yaml) = &args.yaml {
        resources.extend(parse_manifest(yaml.as_bytes()).context("Failed to parse --yaml")?);
    }

    let mut config = load_config()?;
    config.allow_empty |= args.allow_empty;
    if args.no_wait {
        config.apply.wait = false;
    }

    let (service, printer) = connect(config, args.filter.into_filter()).await?;
    let (name, namespace) = (args.app.name.as_str(), args.app.namespace.as_str());

    let plan = service.plan_deploy(name, namespace, resources).await?;
    if plan.graph().is_empty() {
        println!("No changes");
    } else {
        print!("{}", render_plan(plan.graph()));
    }
    if args.diff_only {
        return Ok(());
    }

    let result = service.apply_plan(name, namespace, plan).await;
    finish(service, printer).await;
    let outcome = result?;

    if outcome.no_changes {
        println!("No changes");
    } else {
        println!(
            "Succeeded: {} applied, {} skipped",
            outcome.applied, outcome.skipped
        );
    }
    Ok(())
}

pub async fn delete(app: AppArgs, filter: FilterArgs) -> Result<()> {
    let (service, printer) = connect(load_config()?, filter.into_filter()).await?;
    let result = service.delete(&app.name, &app.namespace).await;
    finish(service, printer).await;

    if result?.fully_deleted {
        println!("Deleted app '{}'", app.name);
    } else {
        println!(
            "Deleted owned resources of app '{}'; the app was kept since some resources remain",
            app.name
        );
    }
    Ok(())
}

pub async fn inspect(app: AppArgs) -> Result<()> {
    let (service, printer) = connect(load_config()?, ResourceFilter::default()).await?;
    let result = service.inspect(&app.name, &app.namespace).await;
    finish(service, printer).await;
    let owned = result?;

    let rows: Vec<[String; 4]> = owned
        .iter()
        .map(|res| {
            [
                res.namespace().to_string(),
                res.name().to_string(),
                res.kind().to_string(),
                res.api_version().to_string(),
            ]
        })
        .collect();
    let header = ["Namespace", "Name", "Kind", "API version"].map(String::from);
    let mut widths = header.clone().map(|h| h.len());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    for row in std::iter::once(&header).chain(&rows) {
        println!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {}",
            row[0],
            row[1],
            row[2],
            row[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        );
    }
    println!("\n{} resource(s)", rows.len());
    Ok(())
}

fn load_config() -> Result<Config> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    ConfigLoader::check(&config).context("Invalid configuration")?;
    Ok(config)
}

/// Service over the cluster plus a task printing its progress events
async fn connect(
    config: Config,
    filter: ResourceFilter,
) -> Result<(AppService, tokio::task::JoinHandle<()>)> {
    tracing::debug!("Initializing Kubernetes client");
    let client = create_client(&config.kube).await?;

    let (events, mut rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", event);
        }
    });

    let store = KubeStore::new(client)
        .with_ignore_failing_api_services(config.ignore_failing_api_services);
    let service = AppService::new(Arc::new(store), config)
        .with_filter(filter)
        .with_events(events);
    Ok((service, printer))
}

/// Drop the service (closing the event channel) and drain pending events
async fn finish(service: AppService, printer: tokio::task::JoinHandle<()>) {
    drop(service);
    let _ = printer.await;
}
