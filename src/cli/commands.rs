//! Command dispatch
//!
//! Each command loads what it needs through the [`ServiceContainer`] and
//! prints through [`crate::cli::output`].

use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use itertools::Itertools;
use tracing::{debug, instrument};

use crate::application::services::{PendingQuestion, TraversalEngine};
use crate::application::{report, ApplicationError, IoResultExt, SessionCodec};
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::output;
use crate::cli::{CliError, CliResult};
use crate::config::{global_config_path, Settings};
use crate::domain::{ClassificationResult, HierarchyNavigator, TraversalSession};
use crate::infrastructure::di::ServiceContainer;
use crate::infrastructure::traits::DecisionStage;

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    let Some(command) = &cli.command else {
        return Err(CliError::Usage(
            "no command given, see `hstree --help`".to_string(),
        ));
    };

    // commands that do not need settings
    match command {
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, name, &mut io::stdout());
            return Ok(());
        }
        Commands::Config {
            command: ConfigCommands::Template,
        } => {
            output::info(&Settings::template());
            return Ok(());
        }
        _ => {}
    }

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(store) = &cli.store {
        settings.store_path = store.clone();
    }
    let container = ServiceContainer::new(settings);

    match command {
        Commands::Build { source, output } => cmd_build(&container, source, output.as_deref()),
        Commands::Stats => cmd_stats(&container),
        Commands::Lookup { code } => cmd_lookup(&container, code),
        Commands::Children { code } => cmd_children(&container, code.as_deref().unwrap_or("")),
        Commands::Tree { code, levels } => cmd_tree(&container, code.as_deref(), *levels),
        Commands::Classify {
            product,
            file,
            json,
            output,
        } => cmd_classify(
            &container,
            product.as_deref(),
            file.as_deref(),
            *json,
            output.as_deref(),
        ),
        Commands::Start { product, oracle } => cmd_start(&container, product, *oracle),
        Commands::Answer { state, answer } => cmd_answer(&container, state, answer.as_deref()),
        Commands::Config { command } => cmd_config(&container, command),
        Commands::Completion { .. } => Ok(()),
    }
}

#[instrument(skip(container))]
fn cmd_build(container: &ServiceContainer, source: &Path, target: Option<&Path>) -> CliResult<()> {
    let service = container.hierarchy_service();
    let built = service.build_from_source(source)?;
    for code in &built.duplicate_codes {
        output::warning(&format!("duplicate code {code} in source, later record kept"));
    }
    let target = target.unwrap_or(container.settings.store_path.as_path());
    service.save(&built.store, target)?;
    output::success(&format!(
        "Built store from {} records: {} codes -> {}",
        built.record_count,
        built.store.len(),
        target.display()
    ));
    Ok(())
}

fn cmd_stats(container: &ServiceContainer) -> CliResult<()> {
    let store = container.load_store(None)?;
    let stats = store.stats();
    output::header("Store");
    output::action("Path", &container.settings.store_path.display());
    output::action("Built", &stats.built_at.to_rfc3339());
    output::action("Nodes", &stats.total_nodes);
    output::action("Indexed codes", &stats.indexed_codes);
    output::action("Chapters", &stats.chapters);
    output::action("Max depth", &stats.max_depth);
    Ok(())
}

fn cmd_lookup(container: &ServiceContainer, code: &str) -> CliResult<()> {
    let store = container.load_store(None)?;
    let node = store
        .lookup(code)
        .ok_or_else(|| CliError::InvalidArgs(format!("unknown code {code:?}")))?;

    output::header(&format!("{} {}", node.code.trim(), node.description));
    output::action(
        "Path",
        &store.display_path(code, &container.settings.separator),
    );
    if !node.units.is_empty() {
        output::action("Units", &node.units.join(", "));
    }
    let rates = &node.duty_rates;
    if !(rates.general.is_empty() && rates.special.is_empty() && rates.other.is_empty()) {
        output::action("General", &rates.general);
        output::action("Special", &rates.special);
        output::action("Other", &rates.other);
    }
    for footnote in &node.footnotes {
        output::detail(&format!("[{}] {}", footnote.columns.join(","), footnote.value));
    }
    Ok(())
}

fn cmd_children(container: &ServiceContainer, code: &str) -> CliResult<()> {
    let store = container.load_store(None)?;
    let navigator = HierarchyNavigator::new(&store);
    let options = navigator.options(&store, code);
    if options.is_empty() {
        output::info(&format!("{} has no children", display_code(code)));
        return Ok(());
    }
    for (i, option) in options.iter().enumerate() {
        output::option(i + 1, &option.code, &option.description);
    }
    Ok(())
}

fn cmd_tree(container: &ServiceContainer, code: Option<&str>, levels: usize) -> CliResult<()> {
    let store = container.load_store(None)?;
    let tree = store
        .render_subtree(code, levels)
        .ok_or_else(|| CliError::InvalidArgs(format!("unknown code {:?}", code.unwrap_or(""))))?;
    output::info(&tree);
    Ok(())
}

#[instrument(skip(container))]
fn cmd_classify(
    container: &ServiceContainer,
    product: Option<&str>,
    file: Option<&Path>,
    json: bool,
    output_path: Option<&Path>,
) -> CliResult<()> {
    let engine = container.engine(container.load_store(None)?)?;
    let mut failed: Vec<ApplicationError> = Vec::new();

    let rendered = match (product, file) {
        (Some(product), _) => {
            let result = engine.classify(product)?;
            if json {
                report::to_json(&result)?
            } else {
                report::render_text(&result)
            }
        }
        (None, Some(file)) => {
            let content = container
                .fs
                .read_to_string(file)
                .with_path_context("read product list", file)?;
            let products = parse_product_list(&content)?;
            debug!("Read {} products from {}", products.len(), file.display());

            let mut results: Vec<ClassificationResult> = Vec::with_capacity(products.len());
            for (product, outcome) in products.iter().zip(engine.classify_batch(&products)) {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        output::error(&format!("{product:?}: {e}"));
                        failed.push(e);
                    }
                }
            }
            if json {
                report::to_json(&results)?
            } else {
                results.iter().map(report::render_text).join("\n")
            }
        }
        (None, None) => {
            return Err(CliError::Usage(
                "give a product description or --file".to_string(),
            ))
        }
    };

    match output_path {
        Some(path) => {
            container
                .fs
                .ensure_parent(path)
                .and_then(|_| container.fs.write(path, rendered.as_bytes()))
                .with_path_context("write report", path)?;
            output::success(&format!("Report written to {}", path.display()));
        }
        None => output::info(&rendered),
    }

    // partial reports are written, but the run still fails
    let total = failed.len();
    match failed.into_iter().next() {
        Some(first) => {
            output::failure(&format!("{total} product(s) could not be classified"));
            Err(first.into())
        }
        None => Ok(()),
    }
}

/// Products of a `--file` batch: a JSON array of description strings.
fn parse_product_list(content: &str) -> CliResult<Vec<String>> {
    let products: Vec<String> = serde_json::from_str(content).map_err(|e| {
        CliError::Usage(format!(
            "product file must be a JSON array of description strings: {e}"
        ))
    })?;
    Ok(products
        .into_iter()
        .map(|product| product.trim().to_string())
        .filter(|product| !product.is_empty())
        .collect())
}

fn cmd_start(container: &ServiceContainer, product: &str, use_oracle: bool) -> CliResult<()> {
    let store = container.load_store(None)?;
    let engine = if use_oracle {
        container.engine(store)?
    } else {
        container.interactive_engine(store)
    };
    let codec = container.session_codec()?;
    let session = engine.open(product);
    let session = if use_oracle {
        engine.advance(&session)?
    } else {
        session
    };
    show_session(&engine, &codec, &session)
}

fn cmd_answer(container: &ServiceContainer, state: &str, answer: Option<&str>) -> CliResult<()> {
    let codec = container.session_codec()?;
    let session = codec.decode(state)?;
    let store = container.load_store(None)?;
    let (engine, next) = match answer {
        Some(answer) => {
            let engine = container.interactive_engine(store);
            let next = engine.advance_with_answer(&session, answer);
            (engine, next)
        }
        None => {
            let engine = container.engine(store)?;
            let next = engine.advance(&session)?;
            (engine, next)
        }
    };
    show_session(&engine, &codec, &next)
}

/// Print the session blob, then either the next question or the result.
fn show_session(
    engine: &TraversalEngine,
    codec: &SessionCodec,
    session: &TraversalSession,
) -> CliResult<()> {
    if let Some(result) = engine.result(session) {
        output::info(&report::render_text(&result));
        return Ok(());
    }
    output::action("Session", &codec.encode(session)?);
    if let Some(question) = engine.pending_question(session) {
        show_question(&question);
    }
    Ok(())
}

fn show_question(question: &PendingQuestion) {
    match question.stage {
        DecisionStage::TopLevel => output::header("Choose a chapter:"),
        DecisionStage::Child => {
            output::header(&format!(
                "At {} ({}), choose one or answer \"FINAL: {}\":",
                question.current_code, question.current_path, question.current_code
            ));
        }
    }
    for (i, option) in question.options.iter().enumerate() {
        output::option(i + 1, &option.code, &option.description);
    }
}

fn cmd_config(container: &ServiceContainer, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => output::info(&container.settings.to_toml()?),
        ConfigCommands::Template => output::info(&Settings::template()),
        ConfigCommands::Path => {
            let global = global_config_path().unwrap_or_else(|| PathBuf::from("(unavailable)"));
            let marker = if global.exists() { "" } else { " (not found)" };
            output::action("Global", &format!("{}{}", global.display(), marker));
            output::action("Store", &container.settings.store_path.display());
        }
    }
    Ok(())
}

fn display_code(code: &str) -> &str {
    if code.trim().is_empty() {
        "(top level)"
    } else {
        code
    }
}
