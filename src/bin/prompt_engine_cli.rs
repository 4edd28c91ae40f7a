//! prompt-engine CLI：提示词模板校验、示例变量生成、执行与执行记录查询的命令行工具
//!
//! Usage:
//!   prompt-engine run <template> [OPTIONS]        Execute a template file
//!   prompt-engine validate <template> [OPTIONS]   Validate and enrich variables
//!   prompt-engine example <template>              Print example variables
//!   prompt-engine providers [--config <path>]     List configured providers
//!   prompt-engine history --ledger <path>         List recorded executions

use anyhow::{bail, Context};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use prompt_engine::schema::{generate_example_variables, required_variables, variable_description};
use prompt_engine::{
    validate_and_enrich, Error, ExecutionEngine, ExecutionLedger, ExecutionRequest,
    InMemoryPromptCatalog, JsonlLedger, LedgerQuery, Pagination, PromptTemplate, Settings,
    Variables,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "validate" => cmd_validate(&args[2..]),
        "example" => cmd_example(&args[2..]),
        "providers" => cmd_providers(&args[2..]),
        "history" => cmd_history(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"prompt-engine: 提示词执行引擎命令行工具

USAGE:
    prompt-engine <COMMAND> [OPTIONS]

COMMANDS:
    run <template>              Render and execute a template file (YAML or JSON)
    validate <template>         Validate variables and print the enriched set
    example <template>          Print example variables generated from the schema
    providers                   List configured providers and model prices
    history --ledger <path>     List executions recorded in a JSONL ledger
    version                     Show version information
    help                        Show this help message

OPTIONS:
    --config <path>             Settings file (engine + providers)
    --var <name=value>          Set one variable (value parsed as JSON when possible)
    --vars <json>               Set variables from a JSON object
    --provider <name>           Provider to use
    --model <name>              Model to use
    --temperature <t>           Sampling temperature in [0, 1]
    --max-tokens <n>            Output token cap
    --caller <id>               Caller id recorded with the execution (default 0)
    --ledger <path>             Append executions to a JSONL ledger

ENVIRONMENT:
    PROMPT_ENGINE_*             Engine setting overrides
    OPENAI_API_KEY, GEMINI_API_KEY, ANTHROPIC_API_KEY
    RUST_LOG                    Log filter (default: warn)"#
    );
}

fn cmd_version() {
    println!("prompt-engine {}", env!("CARGO_PKG_VERSION"));
}

/// Value following `flag`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.iter()
        .enumerate()
        .filter(|(_, a)| a.as_str() == flag)
        .filter_map(|(i, _)| args.get(i + 1).map(String::as_str))
        .collect()
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match flag_value(args, flag) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {flag} '{raw}': {e}")),
        None => Ok(None),
    }
}

fn template_arg(args: &[String]) -> anyhow::Result<&str> {
    match args.first() {
        Some(path) if !path.starts_with("--") => Ok(path),
        _ => bail!("missing <template> argument"),
    }
}

fn load_template(path: &str) -> anyhow::Result<PromptTemplate> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing template {path}"))
}

fn load_settings(args: &[String]) -> anyhow::Result<Settings> {
    match flag_value(args, "--config") {
        Some(path) => Ok(Settings::load(Path::new(path))?),
        None => Ok(Settings::from_yaml_str("{}")?),
    }
}

fn collect_variables(args: &[String]) -> anyhow::Result<Variables> {
    let mut vars = match flag_value(args, "--vars") {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("parsing --vars")? {
            Value::Object(map) => map,
            _ => bail!("--vars must be a JSON object"),
        },
        None => Variables::new(),
    };
    for pair in flag_values(args, "--var") {
        let Some((name, raw)) = pair.split_once('=') else {
            bail!("--var expects name=value, got '{pair}'");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(name.to_string(), value);
    }
    Ok(vars)
}

fn print_violations(err: &Error) {
    for v in err.violations() {
        eprintln!("  {v}");
    }
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let template = load_template(template_arg(args)?)?;
    let settings = load_settings(args)?;
    let prompt_id = template.id;

    let catalog = InMemoryPromptCatalog::new().with_template(template)?;
    let mut builder = ExecutionEngine::builder()
        .settings(&settings)?
        .catalog(Arc::new(catalog));
    if let Some(path) = flag_value(args, "--ledger") {
        builder = builder.ledger(Arc::new(JsonlLedger::open(path).await?));
    }
    let engine = builder.build()?;

    let mut request = ExecutionRequest::new(prompt_id, parse_flag(args, "--caller")?.unwrap_or(0))
        .variables(collect_variables(args)?);
    if let Some(p) = flag_value(args, "--provider") {
        request = request.provider(p);
    }
    if let Some(m) = flag_value(args, "--model") {
        request = request.model(m);
    }
    if let Some(t) = parse_flag(args, "--temperature")? {
        request = request.temperature(t);
    }
    if let Some(n) = parse_flag(args, "--max-tokens")? {
        request = request.max_tokens(n);
    }

    match engine.execute(request).await {
        Ok(resp) => {
            println!("{}", resp.output);
            eprintln!();
            eprintln!(
                "execution {} | {}/{} | {} tokens | ${:.6} | {:.2}s",
                resp.execution_id,
                resp.provider_name,
                resp.model_name,
                resp.tokens_used,
                resp.cost_usd,
                resp.duration_seconds
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("[{}] {}", e.code(), e);
            print_violations(&e);
            std::process::exit(1);
        }
    }
}

fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let template = load_template(template_arg(args)?)?;
    for warning in template.variables_schema.lint() {
        eprintln!("warning: {warning}");
    }
    let vars = collect_variables(args)?;
    match validate_and_enrich(&vars, &template.variables_schema) {
        Ok(enriched) => {
            println!("{}", serde_json::to_string_pretty(&Value::Object(enriched))?);
            Ok(())
        }
        Err(e) => {
            eprintln!("[{}] {}", e.code(), e);
            print_violations(&e);
            std::process::exit(1);
        }
    }
}

fn cmd_example(args: &[String]) -> anyhow::Result<()> {
    let template = load_template(template_arg(args)?)?;
    let schema = &template.variables_schema;
    let example = generate_example_variables(schema);
    println!("{}", serde_json::to_string_pretty(&Value::Object(example))?);

    let required = required_variables(schema);
    if !required.is_empty() {
        eprintln!();
        eprintln!("Required variables:");
        for name in required {
            eprintln!("  {}", variable_description(schema, &name));
        }
    }
    Ok(())
}

fn cmd_providers(args: &[String]) -> anyhow::Result<()> {
    let settings = load_settings(args)?;
    let registry = settings.provider_registry()?;
    for descriptor in registry.descriptors().filter(|d| d.active) {
        let key_state = match std::env::var(descriptor.credential_env()) {
            Ok(v) if !v.trim().is_empty() => "set",
            _ => "missing",
        };
        println!(
            "{} ({}) default={} key {}={}",
            descriptor.name,
            descriptor.kind,
            descriptor.default_model,
            descriptor.credential_env(),
            key_state
        );
        for model in descriptor.models.iter().filter(|m| m.active) {
            let price = match (model.input_price, model.output_price) {
                (Some(i), Some(o)) => format!("${i}/1K in, ${o}/1K out"),
                _ => "unpriced".to_string(),
            };
            let budget = model
                .max_tokens
                .map(|n| format!(", max {n} tokens"))
                .unwrap_or_default();
            println!("    {}: {}{}", model.model_identifier, price, budget);
        }
    }
    Ok(())
}

async fn cmd_history(args: &[String]) -> anyhow::Result<()> {
    let Some(path) = flag_value(args, "--ledger") else {
        bail!("history requires --ledger <path>");
    };
    let ledger = JsonlLedger::open(path).await?;
    let mut query = LedgerQuery::new();
    if let Some(caller) = parse_flag(args, "--caller")? {
        query = query.caller(caller);
    }
    if let Some(status) = parse_flag(args, "--status")? {
        query = query.status(status);
    }
    let page = Pagination::new(
        parse_flag(args, "--skip")?.unwrap_or(0),
        parse_flag(args, "--limit")?.unwrap_or(20),
    );
    for record in ledger.list(&query, page).await? {
        println!(
            "{:>6}  {}  prompt={} caller={} {}/{} {:<7} tokens={} ${:.6}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.prompt_id,
            record.caller_id,
            record.provider_name,
            record.model_name,
            record.status.as_str(),
            record.tokens_used,
            record.cost_usd
        );
        if let Some(msg) = &record.error_message {
            println!("        error: {msg}");
        }
    }
    Ok(())
}
