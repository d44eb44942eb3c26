use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use zapper::commands::{self, Options};
use zapper::config::Layer;

/// zapper - environment module manager
///
/// Loads and unloads packages into the environment of the calling shell and
/// keeps the set of loaded packages in named or temporary sessions.
///
/// The shell applies the changes by evaluating the translation written to the
/// file named in ZAPPER_TARGET_TRANSLATOR (`bash:<file>`).
///
/// Examples:
///   zapper load gcc-4.8     # Load a package
///   zapper -r load python   # Load a package and what it requires
///   zapper session create work
#[derive(Parser, Debug)]
#[command(author, version = env!("ZAPPER_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More output (-v: info, -vv: debug)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Resolve missing requirements (-r: available packages, -rr: all packages)
    #[arg(short = 'r', long = "resolve", action = clap::ArgAction::Count, global = true)]
    resolve: u8,

    /// Also load or unload the packages of suites
    #[arg(short = 's', long, global = true)]
    subpackages: bool,

    /// Allow unloading sticky packages
    #[arg(long, global = true)]
    sticky: bool,

    /// Show what would change without changing anything
    #[arg(short = 'n', long = "dry-run", visible_alias = "simulate", global = true)]
    dry_run: bool,

    /// Change read-only sessions
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Print the translation for the shell
    #[arg(long = "show-translation", global = true)]
    show_translation: bool,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            resolve: self.resolve,
            subpackages: self.subpackages,
            sticky: self.sticky,
            dry_run: self.dry_run,
            force: self.force,
            yes: self.yes,
            show_translation: self.show_translation,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load packages
    Load(LabelsArgs),

    /// Unload packages
    Unload(LabelsArgs),

    /// Unload all packages
    Clear,

    /// List available packages
    Avail(PatternArgs),

    /// List loaded packages
    List,

    /// Show a package
    Show(ShowArgs),

    /// Manage sessions
    #[command(subcommand)]
    Session(SessionCommands),

    /// Show or change configuration
    #[command(subcommand)]
    Config(SettingCommands),

    /// Show or change preferred versions
    #[command(subcommand)]
    VersionDefaults(SettingCommands),
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// Create a session (temporary without a name) and switch to it
    Create(CreateArgs),

    /// Switch to a session
    Load(NameArgs),

    /// Delete sessions, by default the current one
    Delete(PatternArgs),

    /// Copy a session; with one name the current session is copied
    Copy(CopyArgs),

    /// Show a session, by default the current one
    Info(OptionalNameArgs),

    /// List sessions
    List(OptionalNameArgs),
}

#[derive(Subcommand, Debug)]
enum SettingCommands {
    /// Show values
    Show(ShowLayerArgs),

    /// Set key=value pairs
    Set(SetArgs),

    /// Remove keys
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
struct LabelsArgs {
    /// Package labels, such as gcc, gcc-4.8 or gnu-4.8/gcc
    #[arg(value_name = "LABEL", required = true)]
    labels: Vec<String>,
}

#[derive(Args, Debug)]
struct PatternArgs {
    #[arg(value_name = "PATTERN")]
    patterns: Vec<String>,
}

#[derive(Args, Debug)]
struct ShowArgs {
    #[arg(value_name = "LABEL")]
    label: String,
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(value_name = "NAME")]
    name: Option<String>,

    #[arg(short = 'd', long, default_value = "")]
    description: String,
}

#[derive(Args, Debug)]
struct NameArgs {
    #[arg(value_name = "NAME")]
    name: String,
}

#[derive(Args, Debug)]
struct OptionalNameArgs {
    #[arg(value_name = "NAME")]
    name: Option<String>,
}

#[derive(Args, Debug)]
struct CopyArgs {
    /// [SOURCE] TARGET...
    #[arg(value_name = "NAME", required = true)]
    names: Vec<String>,
}

#[derive(Args, Debug, Default)]
#[group(multiple = false)]
struct LayerArgs {
    /// Host layer (administrators only)
    #[arg(long)]
    host: bool,

    /// User layer
    #[arg(long)]
    user: bool,

    /// Current session
    #[arg(long)]
    session: bool,
}

impl LayerArgs {
    fn layer(&self) -> Option<Layer> {
        if self.host {
            Some(Layer::Host)
        } else if self.user {
            Some(Layer::User)
        } else if self.session {
            Some(Layer::Session)
        } else {
            None
        }
    }
}

#[derive(Args, Debug)]
struct ShowLayerArgs {
    #[command(flatten)]
    layer: LayerArgs,
}

#[derive(Args, Debug)]
struct SetArgs {
    #[command(flatten)]
    layer: LayerArgs,

    #[arg(value_name = "KEY=VALUE", required = true)]
    pairs: Vec<String>,
}

#[derive(Args, Debug)]
struct ResetArgs {
    #[command(flatten)]
    layer: LayerArgs,

    #[arg(value_name = "KEY")]
    keys: Vec<String>,
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level(cli.verbose)))
        .init();
    let runtime = zapper::runtime::RealRuntime;
    let options = cli.options();

    match cli.command {
        Commands::Load(args) => commands::load(runtime, options, &args.labels)?,
        Commands::Unload(args) => commands::unload(runtime, options, &args.labels)?,
        Commands::Clear => commands::clear(runtime, options)?,
        Commands::Avail(args) => commands::avail(runtime, options, &args.patterns)?,
        Commands::List => commands::list(runtime, options)?,
        Commands::Show(args) => commands::show(runtime, options, &args.label)?,
        Commands::Session(command) => match command {
            SessionCommands::Create(args) => {
                commands::create_session(runtime, options, args.name.as_deref(), &args.description)?
            }
            SessionCommands::Load(args) => commands::load_session(runtime, options, &args.name)?,
            SessionCommands::Delete(args) => commands::delete_sessions(runtime, options, &args.patterns)?,
            SessionCommands::Copy(args) => commands::copy_sessions(runtime, options, &args.names)?,
            SessionCommands::Info(args) => commands::session_info(runtime, options, args.name.as_deref())?,
            SessionCommands::List(args) => commands::session_list(runtime, options, args.name.as_deref())?,
        },
        Commands::Config(command) => match command {
            SettingCommands::Show(args) => commands::config_show(runtime, options, args.layer.layer())?,
            SettingCommands::Set(args) => {
                let layer = args.layer.layer().unwrap_or(Layer::Session);
                commands::config_set(runtime, options, layer, &args.pairs)?
            }
            SettingCommands::Reset(args) => {
                let layer = args.layer.layer().unwrap_or(Layer::Session);
                commands::config_reset(runtime, options, layer, &args.keys)?
            }
        },
        Commands::VersionDefaults(command) => match command {
            SettingCommands::Show(args) => {
                commands::version_defaults_show(runtime, options, args.layer.layer())?
            }
            SettingCommands::Set(args) => {
                let layer = args.layer.layer().unwrap_or(Layer::Session);
                commands::version_defaults_set(runtime, options, layer, &args.pairs)?
            }
            SettingCommands::Reset(args) => {
                let layer = args.layer.layer().unwrap_or(Layer::Session);
                commands::version_defaults_reset(runtime, options, layer, &args.keys)?
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_load_parsing() {
        let cli = Cli::try_parse_from(["zapper", "load", "alfa", "beta-1.0"]).unwrap();
        match &cli.command {
            Commands::Load(args) => assert_eq!(args.labels, vec!["alfa", "beta-1.0"]),
            _ => panic!("Expected Load command"),
        }
        assert_eq!(cli.options(), Options::default());
    }

    #[test]
    fn test_cli_load_requires_a_label() {
        assert!(Cli::try_parse_from(["zapper", "load"]).is_err());
    }

    #[test]
    fn test_cli_repeated_resolve() {
        let cli = Cli::try_parse_from(["zapper", "-rr", "load", "beta", "--sticky"]).unwrap();
        let options = cli.options();
        assert_eq!(options.resolve, 2);
        assert!(options.sticky);
    }

    #[test]
    fn test_cli_simulate_alias() {
        let cli = Cli::try_parse_from(["zapper", "unload", "alfa", "--simulate"]).unwrap();
        assert!(cli.options().dry_run);
    }

    #[test]
    fn test_cli_session_create() {
        let cli = Cli::try_parse_from(["zapper", "session", "create", "work", "-d", "daily"]).unwrap();
        match cli.command {
            Commands::Session(SessionCommands::Create(args)) => {
                assert_eq!(args.name.as_deref(), Some("work"));
                assert_eq!(args.description, "daily");
            }
            _ => panic!("Expected session create command"),
        }
    }

    #[test]
    fn test_cli_config_layers() {
        let cli = Cli::try_parse_from(["zapper", "config", "set", "--user", "resolution_level=1"]).unwrap();
        match cli.command {
            Commands::Config(SettingCommands::Set(args)) => {
                assert_eq!(args.layer.layer(), Some(Layer::User));
                assert_eq!(args.pairs, vec!["resolution_level=1"]);
            }
            _ => panic!("Expected config set command"),
        }

        let conflicting = Cli::try_parse_from(["zapper", "config", "show", "--host", "--user"]);
        assert!(conflicting.is_err());
    }

    #[test]
    fn test_cli_version_defaults() {
        let cli = Cli::try_parse_from(["zapper", "version-defaults", "reset", "gcc"]).unwrap();
        match cli.command {
            Commands::VersionDefaults(SettingCommands::Reset(args)) => {
                assert_eq!(args.layer.layer(), None);
                assert_eq!(args.keys, vec!["gcc"]);
            }
            _ => panic!("Expected version-defaults reset command"),
        }
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0), "warn");
        assert_eq!(log_level(1), "info");
        assert_eq!(log_level(5), "debug");
    }
}
