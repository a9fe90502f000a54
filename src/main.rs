use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ctxstore_core::{CtxConfig, OutputFormat, DEFAULT_CONFIG};
use ctxstore_index::lexical::repo_name;
use ctxstore_index::{build_json_indices, query_json_index, CodeHit, EmbeddingGateway, Session};

#[derive(Parser)]
#[command(
    name = "ctxstore",
    version,
    about = "Semantic search index over code and document trees",
    long_about = "ctxstore chunks a repository into functions, classes, or heading-scoped\n\
                   sections, embeds them, and returns the chunks most relevant to a query,\n\
                   trimmed to a word budget so they fit in a language model's context.\n\n\
                   Examples:\n  \
                     ctxstore build --repo . --index code.db\n  \
                     ctxstore query --index code.db --query 'parse the config file'\n  \
                     ctxstore build-json --repo . --output-dir indices\n  \
                     ctxstore query-json --index indices/app_signatures.json --query 'load config'\n  \
                     ctxstore build-prose --repo docs --output indices\n  \
                     ctxstore query-prose --index indices/docs_prose_index.db --query 'install steps'\n\n\
                   Use --model hash for an offline embedder that needs no download."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .ctxstore.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build a dense index of Python functions and classes
    #[command(long_about = "Build a dense index of Python functions and classes.\n\n\
        Every .py file under the repository is parsed with tree-sitter; each function,\n\
        async function, and class becomes one chunk. Unparseable files are skipped.\n\n\
        Examples:\n  ctxstore build --repo . --index code.db\n  ctxstore build --repo src --index code.db --model hash")]
    Build {
        /// Repository root to scan
        #[arg(long)]
        repo: PathBuf,

        /// Output index file
        #[arg(long)]
        index: PathBuf,

        /// Embedding model (default: from config)
        #[arg(long)]
        model: Option<String>,
    },
    /// Query a dense code index
    #[command(long_about = "Query a dense code index.\n\n\
        Returns the top-k chunks by cosine similarity, keeping the first and then any\n\
        further chunk whose snippet still fits the word budget.\n\n\
        Examples:\n  ctxstore query --index code.db --query 'retry with backoff'\n  ctxstore query --index code.db --query 'auth' --k 5 --format json")]
    Query {
        /// Index file written by `build`
        #[arg(long)]
        index: PathBuf,

        /// Natural language query
        #[arg(long)]
        query: String,

        /// Number of results (default: from config, 3)
        #[arg(long)]
        k: Option<usize>,

        /// Word budget across all snippets (default: from config, 2000)
        #[arg(long, alias = "max_tokens")]
        max_tokens: Option<usize>,

        /// Embedding model (default: the one the index was built with)
        #[arg(long)]
        model: Option<String>,

        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Write signature and full-source JSON indices (no embeddings)
    #[command(name = "build-json")]
    BuildJson {
        /// Repository root to scan
        #[arg(long)]
        repo: PathBuf,

        /// Directory for `<repo>_signatures.json` and `<repo>_fullsource.json`
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Keyword search over a JSON index
    #[command(name = "query-json")]
    QueryJson {
        /// Signatures or full-source JSON file
        #[arg(long)]
        index: PathBuf,

        /// Whitespace-separated keywords
        #[arg(long)]
        query: String,

        /// Number of results (default: from config, 3)
        #[arg(long)]
        k: Option<usize>,
    },
    /// Build a dense index of Markdown, text, and notebook sections
    #[command(
        name = "build-prose",
        long_about = "Build a dense index of Markdown, text, and notebook sections.\n\n\
        Documents are split at '#' headings; sections with fewer than five non-blank\n\
        lines are dropped. Notebook markdown cells are joined before splitting.\n\n\
        Examples:\n  ctxstore build-prose --repo docs --output indices\n  ctxstore build-prose --repo docs --index prose.db --model hash"
    )]
    BuildProse {
        /// Repository root to scan
        #[arg(long)]
        repo: PathBuf,

        /// Directory for `<repo>_prose_index.db`
        #[arg(long, default_value = ".")]
        output: PathBuf,

        /// Explicit index file (overrides --output)
        #[arg(long)]
        index: Option<PathBuf>,

        /// Embedding model (default: from config)
        #[arg(long)]
        model: Option<String>,
    },
    /// Query a dense prose index
    #[command(name = "query-prose")]
    QueryProse {
        /// Index file written by `build-prose`
        #[arg(long)]
        index: PathBuf,

        /// Natural language query
        #[arg(long)]
        query: String,

        /// Number of results (default: from config, 3)
        #[arg(long)]
        k: Option<usize>,

        /// Embedding model (default: the one the index was built with)
        #[arg(long)]
        model: Option<String>,
    },
    /// Create a default .ctxstore.toml configuration file
    Init,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<CtxConfig> {
    match path {
        Some(path) => Ok(CtxConfig::from_file(path)?),
        None => {
            let default_path = Path::new(".ctxstore.toml");
            if default_path.exists() {
                Ok(CtxConfig::from_file(default_path)?)
            } else {
                Ok(CtxConfig::default())
            }
        }
    }
}

fn print_code_hits(hits: &[CodeHit]) {
    if hits.is_empty() {
        println!("No relevant snippets found.");
        return;
    }

    println!("=== Query Results ===");
    for (i, hit) in hits.iter().enumerate() {
        println!("\n--- Result {} ---", i + 1);
        println!("File: {}", hit.file);
        println!("Element: {} ({})", hit.element_name, hit.element_type);
        println!("Lines: {}", hit.lines);
        println!("Score: {:.4}", hit.score);
        if !hit.docstring.is_empty() {
            println!("Docstring: {}", truncate_chars(&hit.docstring, 200));
        }
        println!("Snippet:\n{}", hit.snippet);
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn print_json<T: Serialize>(records: &[T]) -> Result<()> {
    if records.is_empty() {
        eprintln!("No matching results found.");
    }
    println!("{}", serde_json::to_string_pretty(records).into_diagnostic()?);
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Init = cli.command {
        let path = Path::new(".ctxstore.toml");
        if path.exists() {
            miette::bail!(".ctxstore.toml already exists");
        }
        std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
        println!("Created .ctxstore.toml with default configuration");
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(
        model = %config.embedding.model,
        k = config.query.k,
        max_tokens = config.query.max_tokens,
        "configuration loaded"
    );

    let gateway = EmbeddingGateway::new().with_progress(std::io::stderr().is_terminal());
    let mut session = Session::with_gateway(config.index.clone(), gateway);

    match cli.command {
        Command::Build { repo, index, model } => {
            let model = model.unwrap_or_else(|| config.embedding.model.clone());
            let report = session.build_code_index(&repo, &index, &model)?;
            eprintln!("{report}");
        }
        Command::Query {
            index,
            query,
            k,
            max_tokens,
            model,
            format,
        } => {
            let k = k.unwrap_or(config.query.k);
            let budget = max_tokens.unwrap_or(config.query.max_tokens);
            let hits = session.query_code(&index, &query, k, Some(budget), model.as_deref())?;
            match format {
                OutputFormat::Text => print_code_hits(&hits),
                OutputFormat::Json => print_json(&hits)?,
            }
        }
        Command::BuildJson { repo, output_dir } => {
            let written = build_json_indices(&repo, &output_dir, &config.index)?;
            eprintln!(
                "Wrote {} signature and {} full-source records from {} files ({} skipped):\n- {}\n- {}",
                written.signature_records,
                written.full_source_records,
                written.stats.files_scanned,
                written.stats.files_skipped,
                written.signatures.display(),
                written.full_source.display()
            );
        }
        Command::QueryJson { index, query, k } => {
            let k = k.unwrap_or(config.query.k);
            let hits = query_json_index(&index, &query, k)?;
            print_json(&hits)?;
        }
        Command::BuildProse {
            repo,
            output,
            index,
            model,
        } => {
            let index = match index {
                Some(path) => path,
                None => {
                    std::fs::create_dir_all(&output).into_diagnostic()?;
                    output.join(format!("{}_prose_index.db", repo_name(&repo)))
                }
            };
            let model = model.unwrap_or_else(|| config.embedding.model.clone());
            let report = session.build_prose_index(&repo, &index, &model)?;
            eprintln!("{report}");
        }
        Command::QueryProse {
            index,
            query,
            k,
            model,
        } => {
            let k = k.unwrap_or(config.query.k);
            let hits = session.query_prose(&index, &query, k, model.as_deref())?;
            print_json(&hits)?;
        }
        Command::Init => {}
    }

    Ok(())
}
