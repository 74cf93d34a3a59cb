use anyhow::{Context, Result};
use argh::FromArgs;
use shell_dispatch::builtin::default_commands;
use shell_dispatch::{
    Command, CommandArgs, CommandDescriptor, Dispatcher, ExecutionContext, PluginRegistry,
    ResultCode, Shell, ShellConfig,
};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{Level, error};

#[derive(FromArgs)]
/// Interactive command shell with aliases, variables and tab completion.
struct Args {
    #[argh(option, default = "String::from(\"> \")")]
    /// prompt shown for a new statement.
    prompt: String,

    #[argh(option)]
    /// statement separator character (default ';').
    separator: Option<char>,

    #[argh(switch)]
    /// end statements at newlines only.
    no_separator: bool,

    #[argh(option)]
    /// file aliases are loaded from and saved to.
    aliases: Option<PathBuf>,

    #[argh(option)]
    /// file keeping the line history.
    history: Option<PathBuf>,

    #[argh(option)]
    /// run the statements of this file instead of reading the terminal.
    batch: Option<PathBuf>,

    #[argh(option)]
    /// load a plugin command by identifier; may be repeated.
    plugin: Vec<String>,

    #[argh(switch)]
    /// print every statement before running it.
    echo: bool,

    #[argh(switch, short = 'v')]
    /// log debug output to stderr.
    verbose: bool,
}

impl Args {
    fn config(&self) -> ShellConfig {
        let defaults = ShellConfig::default();
        let separator = if self.no_separator {
            None
        } else {
            self.separator.or(defaults.separator)
        };
        ShellConfig {
            prompt: self.prompt.clone(),
            separator,
            aliases_file: self.aliases.clone(),
            history_file: self.history.clone(),
            echo_commands: self.echo,
            ..defaults
        }
    }
}

/// Prints how long the session has been running.
struct Uptime {
    descriptor: CommandDescriptor,
    started: Instant,
}

impl Uptime {
    fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new("uptime")
                .in_group("plugins")
                .describe("shows how long this session is running"),
            started: Instant::now(),
        }
    }
}

impl Command for Uptime {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn execute(
        &self,
        dispatcher: &mut Dispatcher,
        _context: Option<&dyn ExecutionContext>,
        args: &CommandArgs,
    ) -> Result<ResultCode> {
        if !args.is_empty() {
            return Ok(ResultCode::SyntaxError);
        }
        let secs = self.started.elapsed().as_secs();
        dispatcher.print(format_args!("up {}m {}s", secs / 60, secs % 60));
        Ok(ResultCode::Success)
    }
}

fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if verbose { Level::DEBUG } else { Level::WARN })
        .without_time()
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    init_tracing(args.verbose);

    let mut dispatcher = Dispatcher::default();
    for command in default_commands() {
        dispatcher.register(command)?;
    }

    let mut plugins = PluginRegistry::new();
    plugins.register_factory("uptime", || -> Box<dyn Command> { Box::new(Uptime::new()) });
    for id in &args.plugin {
        if let Err(e) = plugins.load(&mut dispatcher, id) {
            error!(plugin = %id, error = %e, "can't load plugin");
        }
    }

    let mut shell = Shell::new(args.config(), dispatcher);
    let code = match &args.batch {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("can't open batch file {}", path.display()))?;
            shell.run_batch(BufReader::new(file))?
        }
        None => {
            shell
                .interrupts()
                .install()
                .context("can't install the Ctrl-C handler")?;
            shell.run()?
        }
    };
    drop(shell);
    std::process::exit(code)
}
