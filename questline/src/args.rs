//! Command line parsing.

use std::path::PathBuf;

/// What one invocation should do.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub state_path: PathBuf,
    pub character: String,
    pub lore_path: Option<PathBuf>,
    pub compress: bool,
    pub help: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("questline-state.json"),
            character: "Adventurer".to_string(),
            lore_path: None,
            compress: false,
            help: false,
        }
    }
}

/// Parse `args` (including the program name). Unknown flags are ignored.
pub fn parse_config_from_args(args: &[String]) -> RunConfig {
    let mut config = RunConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--state" => {
                if let Some(path) = args.get(i + 1) {
                    config.state_path = PathBuf::from(path);
                    i += 1;
                }
            }
            "--character" => {
                if let Some(name) = args.get(i + 1) {
                    config.character = name.clone();
                    i += 1;
                }
            }
            "--lore" => {
                if let Some(path) = args.get(i + 1) {
                    config.lore_path = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--compress" => config.compress = true,
            "--help" | "-h" => config.help = true,
            _ => {}
        }
        i += 1;
    }

    config
}

pub fn print_help() {
    println!("questline - generate a quest for a character and maintain their memory");
    println!();
    println!("USAGE:");
    println!("    questline [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --state <path>       State snapshot to load and save (default: questline-state.json)");
    println!("    --character <name>   Character to generate for, created if missing (default: Adventurer)");
    println!("    --lore <path>        Canonical lore JSON (default: built-in Emberfall lore)");
    println!("    --compress           Run one memory compression batch after generating");
    println!("    -h, --help           Show this help");
    println!();
    println!("ENVIRONMENT:");
    println!("    ANTHROPIC_API_KEY    Required. May be set in a .env file");
    println!("    QUESTLINE_*          Overrides for model, thresholds and batch sizes");
    println!("    RUST_LOG             Log filter (default: info)");
}
