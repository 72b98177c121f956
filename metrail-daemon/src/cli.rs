//! CLI argument definitions for metrail.
//!
//! Uses `clap` v4 derive macros. Flags override the corresponding
//! fields of the TOML configuration file.

use std::path::PathBuf;

use clap::Parser;

/// Extract whitebox metrics from application logs.
///
/// metrail compiles small pattern/action programs, runs them against
/// every line of the tailed log files, and exports the resulting
/// counters, gauges, and histograms.
#[derive(Parser, Debug)]
#[command(name = "metrail")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to metrail.toml configuration file.
    #[arg(short, long, default_value = "/etc/metrail/metrail.toml")]
    pub config: PathBuf,

    /// Directory of program source files (overrides config).
    #[arg(long)]
    pub progs: Option<PathBuf>,

    /// Log file to tail. May be given multiple times (overrides config).
    #[arg(long = "log")]
    pub logs: Vec<PathBuf>,

    /// Read all input files from the beginning once, dump metrics, then exit.
    #[arg(long)]
    pub one_shot: bool,

    /// Compile programs, print diagnostics, then exit.
    #[arg(long)]
    pub compile_only: bool,

    /// Print the syntax tree after parsing (with --compile-only).
    #[arg(long)]
    pub dump_ast: bool,

    /// Print the typed syntax tree after type checking (with --compile-only).
    #[arg(long)]
    pub dump_ast_types: bool,

    /// Print the program bytecode after code generation (with --compile-only).
    #[arg(long)]
    pub dump_bytecode: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting.
    #[arg(long)]
    pub validate: bool,
}

/// CLI 플래그를 설정 위에 덮어씁니다.
pub fn apply_overrides(config: &mut metrail_core::MetrailConfig, cli: &Cli) {
    if let Some(progs) = &cli.progs {
        config.programs.path = progs.display().to_string();
    }
    if !cli.logs.is_empty() {
        config.logs.paths = cli.logs.iter().map(|p| p.display().to_string()).collect();
    }
    if cli.one_shot {
        config.runtime.one_shot = true;
    }
    if cli.compile_only {
        config.runtime.compile_only = true;
    }
    if cli.dump_ast {
        config.runtime.dump_ast = true;
    }
    if cli.dump_ast_types {
        config.runtime.dump_ast_types = true;
    }
    if cli.dump_bytecode {
        config.runtime.dump_bytecode = true;
    }
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_mode_flags() {
        let cli = Cli::parse_from([
            "metrail",
            "--progs",
            "/opt/progs",
            "--log",
            "/var/log/a.log",
            "--log",
            "/var/log/b.log",
            "--one-shot",
        ]);
        assert_eq!(cli.progs.as_deref(), Some(std::path::Path::new("/opt/progs")));
        assert_eq!(cli.logs.len(), 2);
        assert!(cli.one_shot);
        assert!(!cli.compile_only);
    }

    #[test]
    fn parse_dump_flags() {
        let cli = Cli::parse_from(["metrail", "--compile-only", "--dump-bytecode"]);
        assert!(cli.compile_only);
        assert!(cli.dump_bytecode);
        assert!(!cli.dump_ast);
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let cli = Cli::parse_from([
            "metrail",
            "--progs",
            "/opt/progs",
            "--log",
            "/var/log/app.log",
            "--one-shot",
            "--log-level",
            "debug",
        ]);
        let mut config = metrail_core::MetrailConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.programs.path, "/opt/progs");
        assert_eq!(config.logs.paths, vec!["/var/log/app.log"]);
        assert!(config.runtime.one_shot);
        assert_eq!(config.general.log_level, "debug");
    }

    #[test]
    fn missing_flags_keep_config_values() {
        let cli = Cli::parse_from(["metrail"]);
        let mut config = metrail_core::MetrailConfig::default();
        config.general.log_level = "warn".to_owned();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.general.log_level, "warn");
        assert!(!config.runtime.one_shot);
    }
}
