//! Command-line interface for the Baetyl device-management runtime.

mod loopback;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use baetyl_core::{LoggerConfig, ServiceContext};
use baetyl_dm::blink::{
    gen_event_report_blink_data, gen_lifecycle_report_blink_data, gen_property_get_blink_data,
    gen_property_invoke_blink_data, gen_property_report_blink_data, parse_property_keys,
};
use baetyl_dm::{exec_mapping, load_driver_config, parse_expression, LoadOptions, PropertyType};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};

/// Baetyl device-management tools.
#[derive(Parser, Debug)]
#[command(name = "baetyl-dm")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and check the files of a driver directory.
    Validate {
        /// Directory holding sub_devices.yml, models.yml and access_template.yml.
        #[arg(short, long, default_value = "etc/baetyl")]
        dir: PathBuf,
        /// Driver name.
        #[arg(long)]
        driver: String,
        /// Reject malformed accessConfig entries.
        #[arg(long)]
        strict: bool,
    },
    /// Evaluate a mapping expression.
    Expr {
        /// Expression such as `ratio(x1,10)`.
        expression: String,
        /// Value bound to every `x<ID>` reference.
        #[arg(long)]
        value: String,
        /// Result type.
        #[arg(short = 't', long = "type", default_value = "float64")]
        ty: String,
    },
    /// Print a freshly built blink envelope.
    Blink {
        #[arg(value_enum)]
        method: BlinkMethod,
        /// JSON content: a map for post/invoke/event, a key list for get.
        #[arg(long)]
        data: Option<String>,
    },
    /// Run the loopback driver against the local broker.
    Run {
        /// Service config file (defaults to $BAETYL_CONF_FILE or etc/baetyl/conf.yml).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Driver name.
        #[arg(long, default_value = "loopback")]
        driver: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BlinkMethod {
    Post,
    Invoke,
    Get,
    Event,
    Online,
    Offline,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Command::Run { config, driver } = args.command {
        let mut service = ServiceContext::from_env();
        if let Some(path) = config {
            service = service.with_config_file(path);
        }
        return baetyl_core::run_with_context(service, move |service| {
            loopback::serve(service, driver)
        });
    }

    let level = if args.verbose { "debug" } else { "warn" };
    baetyl_core::logging::init(&LoggerConfig {
        level: level.to_string(),
        ..LoggerConfig::default()
    });

    match execute(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command) -> Result<()> {
    match command {
        Command::Validate { dir, driver, strict } => validate(dir, &driver, strict),
        Command::Expr {
            expression,
            value,
            ty,
        } => evaluate(&expression, &value, &ty),
        Command::Blink { method, data } => print_blink(method, data.as_deref()),
        // Dispatched by main before logging is set up.
        Command::Run { .. } => Ok(()),
    }
}

fn validate(dir: PathBuf, driver: &str, strict: bool) -> Result<()> {
    let options = LoadOptions {
        strict_access_config: strict,
    };
    let tables = load_driver_config(&dir, driver, options)
        .with_context(|| format!("loading driver '{}' from {}", driver, dir.display()))?;

    println!("driver: {}", tables.driver);
    println!("devices: {}", tables.devices.len());
    for device in &tables.devices {
        let access = device
            .access_config
            .as_ref()
            .map(|c| c.protocol())
            .unwrap_or("-");
        println!(
            "  {}  model={} template={} access={}",
            device.name, device.device_model, device.access_template, access
        );
    }

    let mut models: Vec<_> = tables.models.iter().collect();
    models.sort_by(|a, b| a.0.cmp(b.0));
    println!("models: {}", models.len());
    for (name, properties) in models {
        println!("  {} ({} properties)", name, properties.len());
    }

    let mut templates: Vec<_> = tables.templates.values().collect();
    templates.sort_by(|a, b| a.name.cmp(&b.name));
    println!("templates: {}", templates.len());
    for template in templates {
        println!(
            "  {} ({} properties, {} mappings)",
            template.name,
            template.properties.len(),
            template.mappings.len()
        );
    }
    Ok(())
}

fn evaluate(expression: &str, value: &str, ty: &str) -> Result<()> {
    let result_type: PropertyType = ty.parse()?;
    let expression = parse_expression(expression)?;
    let args = expression.bind(|_| value.to_string());
    let result = exec_mapping(expression.method, &args, result_type)?;
    println!("{}", result);
    Ok(())
}

fn print_blink(method: BlinkMethod, data: Option<&str>) -> Result<()> {
    let data: Value = match data {
        Some(text) => serde_json::from_str(text).context("--data is not valid JSON")?,
        None => Value::Null,
    };

    let blink = match method {
        BlinkMethod::Post => gen_property_report_blink_data(as_map(data)?),
        BlinkMethod::Invoke => gen_property_invoke_blink_data(as_map(data)?),
        BlinkMethod::Event => gen_event_report_blink_data(as_map(data)?),
        BlinkMethod::Get => {
            let keys = if data.is_null() {
                Vec::new()
            } else {
                parse_property_keys(&data)?
            };
            gen_property_get_blink_data(&keys)
        }
        BlinkMethod::Online => gen_lifecycle_report_blink_data(true),
        BlinkMethod::Offline => gen_lifecycle_report_blink_data(false),
    };

    println!("{}", serde_json::to_string_pretty(&blink)?);
    Ok(())
}

fn as_map(data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--data must be a JSON object, got {}", other),
    }
}
