//! callgate：能力发现与弹性调度的命令行工具
//!
//! Usage:
//!   callgate services                           List discovered services
//!   callgate schema <service>                   Print a service's JSON Schema
//!   callgate call <service> <json> [--repeat N] Dispatch a payload
//!   callgate health                             Print the health report
//!   callgate check-config <path>                Validate a YAML config

use anyhow::{bail, Context};
use callgate::{
    DeclaredParam, Dispatcher, FunctionDef, GatewayConfig, LibraryFailure, Namespace,
    StaticLibrary,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callgate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_flag(&mut args, "--config");

    if args.is_empty() {
        print_usage();
        std::process::exit(1);
    }

    let outcome = match args[0].as_str() {
        "services" => cmd_services(config_path),
        "schema" => cmd_schema(config_path, &args[1..]),
        "call" => cmd_call(config_path, &args[1..]).await,
        "health" => cmd_health(config_path),
        "check-config" => cmd_check_config(&args[1..]),
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

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"callgate：能力发现与弹性调度

USAGE:
    callgate [--config <path>] <COMMAND> [OPTIONS]

COMMANDS:
    services                        List discovered services and the scan report
    schema <service>                Print the JSON Schema of a service
    call <service> <json> [--repeat N]
                                    Dispatch a JSON payload, N times
    health                          Print the health report
    check-config <path>             Validate a YAML configuration file
    version                         Show version information
    help                            Show this help message

ENVIRONMENT:
    RUST_LOG                        Log filter (default: callgate=info)
    CALLGATE_*                      Resilience overrides, e.g. CALLGATE_POOL_SIZE"#
    );
}

fn cmd_version() {
    println!("callgate {}", env!("CARGO_PKG_VERSION"));
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let i = args.iter().position(|a| a == flag)?;
    args.remove(i);
    if i < args.len() {
        Some(args.remove(i))
    } else {
        None
    }
}

fn load_config(path: Option<String>) -> anyhow::Result<GatewayConfig> {
    let mut config = match path {
        Some(p) => GatewayConfig::from_path(&p).with_context(|| format!("loading {p}"))?,
        None => GatewayConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build(config_path: Option<String>) -> anyhow::Result<Dispatcher> {
    let dispatcher = Dispatcher::builder()
        .library(demo_library())
        .config(load_config(config_path)?)
        .build()?;
    Ok(dispatcher)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_services(config_path: Option<String>) -> anyhow::Result<()> {
    let dispatcher = build(config_path)?;
    let registry = dispatcher.registry();
    for (name, descriptor) in registry.iter() {
        let params: Vec<String> = descriptor
            .signature
            .parameters
            .iter()
            .map(|p| {
                let marker = if p.is_required() { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.type_tag.name())
            })
            .collect();
        let degraded = if descriptor.degraded { "  [degraded]" } else { "" };
        println!("{name}({}){degraded}", params.join(", "));
        if !descriptor.signature.description.is_empty() {
            println!("    {}", descriptor.signature.description);
        }
    }
    println!();
    print_json(registry.report())
}

fn cmd_schema(config_path: Option<String>, args: &[String]) -> anyhow::Result<()> {
    let Some(service) = args.first() else {
        bail!("usage: callgate schema <service>");
    };
    let dispatcher = build(config_path)?;
    let registry = dispatcher.registry();
    let descriptor = registry
        .get(service)
        .with_context(|| format!("no service named '{service}'"))?;
    print_json(&descriptor.signature.to_json_schema())
}

async fn cmd_call(config_path: Option<String>, args: &[String]) -> anyhow::Result<()> {
    let mut args = args.to_vec();
    let repeat = match take_flag(&mut args, "--repeat") {
        Some(n) => n.parse::<u32>().with_context(|| format!("invalid --repeat '{n}'"))?,
        None => 1,
    };
    let (Some(service), Some(raw)) = (args.first(), args.get(1)) else {
        bail!("usage: callgate call <service> <json> [--repeat N]");
    };
    let payload: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;

    let dispatcher = build(config_path)?;
    for _ in 0..repeat.max(1) {
        let result = dispatcher.dispatch(service, payload.clone()).await;
        print_json(&result)?;
    }
    if let Some(health) = dispatcher.service_health(service) {
        print_json(&health)?;
    }
    Ok(())
}

fn cmd_health(config_path: Option<String>) -> anyhow::Result<()> {
    let dispatcher = build(config_path)?;
    print_json(&dispatcher.health_report())
}

fn cmd_check_config(args: &[String]) -> anyhow::Result<()> {
    let Some(path) = args.first() else {
        bail!("usage: callgate check-config <path>");
    };
    let config = load_config(Some(path.clone()))?;
    println!("{path}: OK");
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

/// Bundled library used by the CLI.
fn demo_library() -> StaticLibrary {
    StaticLibrary::new("demo")
        .function(
            FunctionDef::blocking("echo", |args| {
                Ok(args.get("text").cloned().unwrap_or_default())
            })
            .param(DeclaredParam::new("text").annotated("str"))
            .returns("str")
            .doc("Return the text unchanged."),
        )
        .function(
            FunctionDef::async_fn("transcribe", |args| async move {
                let Some(audio) = args.upload("audio") else {
                    return Err(LibraryFailure::client_input("audio must be an upload reference"));
                };
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({
                    "upload_id": audio.upload_id,
                    "language": args.get("language").cloned().unwrap_or(Value::Null),
                    "segments": [],
                }))
            })
            .param(DeclaredParam::new("audio").annotated("bytes"))
            .param(
                DeclaredParam::new("language")
                    .annotated("Optional[str]")
                    .with_default(Value::Null),
            )
            .returns("dict")
            .doc("Pretend to transcribe an uploaded audio file."),
        )
        .function(
            FunctionDef::blocking("unstable", |args| {
                if args.get_bool("fail").unwrap_or(false) {
                    Err(LibraryFailure::new("backend unavailable"))
                } else {
                    Ok(json!("ok"))
                }
            })
            .param(DeclaredParam::new("fail").with_default(json!(false)))
            .doc("Fail on request, for exercising the circuit breaker."),
        )
        .function(FunctionDef::blocking("_internal", |_| Ok(Value::Null)))
        .function(
            FunctionDef::blocking("legacy", |args| Ok(args.to_json())).without_metadata(),
        )
        .namespace(
            "math",
            Namespace::new().function(
                FunctionDef::blocking("add", |args| {
                    let a = args.get_f64("a").unwrap_or(0.0);
                    let b = args.get_f64("b").unwrap_or(0.0);
                    Ok(json!(a + b))
                })
                .param(DeclaredParam::new("a").annotated("float"))
                .param(DeclaredParam::new("b").annotated("float").with_default(json!(0.0)))
                .doc("Add two numbers."),
            ),
        )
}
