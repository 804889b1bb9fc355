use clap::{Parser, Subcommand};
use repo_pages::{config, output, site::SiteRenderer};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "repo-pages")]
#[command(about = "Render a JSON content repository into static HTML")]
#[command(long_about = "\
Render a JSON content repository into static HTML

Content lives in JSON files, presentation lives in component directories
named after resource types, and every page is rendered by walking the tree
and dispatching each node to its component.

Repository structure:

  repository/
  ├── pages.toml                       # Config (optional, see gen-config)
  ├── content/<project>/
  │   ├── index.json                   # The content root itself
  │   └── about.json                   # → /content/<project>/about
  ├── apps/<project>/
  │   ├── components/teaser/
  │   │   ├── teaser.html              # Default template for site/components/teaser
  │   │   ├── compact.html             # Selector variant: resource(name=\"x.compact\")
  │   │   └── model.json               # Component model, exposed as `model`
  │   └── partials/footer.html         # Shared includes
  └── models/nav.json                  # Modules for use_model(name=\"nav.json\")

Resource type resolution (first available wins):
  sling:resourceType → jcr:primaryType (':' → '/') → nt/unstructured

Run 'repo-pages gen-config' to generate a documented pages.toml.")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Repository directory
    #[arg(long, default_value = ".", global = true)]
    repo: PathBuf,

    /// Output directory
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Project name, overrides `project` in pages.toml
    #[arg(long, global = true)]
    project: Option<String>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every page and standalone component into the output directory
    Render,
    /// Validate content and compile all components without writing output
    Check,
    /// Print the flattened content tree with resource types
    Tree,
    /// Print a stock pages.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Render => {
            let renderer = renderer(&cli.repo, cli.project.as_deref())?;
            init_thread_pool(&renderer.config().processing);
            println!("==> Rendering {}", cli.repo.display());
            let site = renderer.render()?;
            output::print_render_output(&site);
            let written = site.write_to(&cli.output)?;
            info!(files = written, output = %cli.output.display(), "Output written");
            println!("==> Render complete: {}", cli.output.display());
        }
        Command::Check => {
            let renderer = renderer(&cli.repo, cli.project.as_deref())?;
            init_thread_pool(&renderer.config().processing);
            println!("==> Checking {}", cli.repo.display());
            let report = renderer.check()?;
            output::print_check_output(&report);
            if report.templates_failed > 0 {
                println!("==> {} component(s) failed to compile", report.templates_failed);
            } else {
                println!("==> Repository is valid");
            }
        }
        Command::Tree => {
            let renderer = renderer(&cli.repo, cli.project.as_deref())?;
            let deps = repo_pages::deps::DependencyTracker::new();
            let tree = renderer.build_tree(&deps)?;
            output::print_tree_output(&tree);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the repository config, apply CLI overrides, and build a renderer.
fn renderer(repo: &Path, project: Option<&str>) -> Result<SiteRenderer, config::ConfigError> {
    let mut config = config::load_config(repo)?;
    if let Some(project) = project {
        config.project = project.to_string();
        config.validate()?;
    }
    Ok(SiteRenderer::new(repo, config))
}

/// Install the fmt subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; config can lower the count, not raise it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
