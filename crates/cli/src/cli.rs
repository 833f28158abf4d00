use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "tbridge")]
#[command(about = "Bridge a sandboxed client to elevated filesystem workers")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to the user config dir)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the pairing broker in the foreground until Ctrl-C
	Broker {
		/// Socket to listen on
		#[arg(long, value_name = "PATH")]
		socket: Option<PathBuf>,
	},

	/// Run one elevated worker
	Worker {
		/// Broker socket to connect to
		#[arg(long, value_name = "PATH")]
		broker: Option<PathBuf>,
		/// Directory holding progress sockets
		#[arg(long, value_name = "DIR")]
		progress_dir: Option<PathBuf>,
		/// Recycle bin root
		#[arg(long, value_name = "DIR")]
		recycle_dir: Option<PathBuf>,
		/// Program used for quick-look previews
		#[arg(long, value_name = "PROGRAM")]
		previewer: Option<String>,
	},

	/// Check that a worker can be reached
	Ping,

	/// Start a program through a worker
	Run {
		program: String,
		/// Arguments passed to the program
		#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
		args: Vec<String>,
		/// Wait for the program to exit
		#[arg(long)]
		wait: bool,
		/// Request administrator authority
		#[arg(long)]
		admin: bool,
		#[arg(long)]
		no_window: bool,
	},

	/// Rename an item within its directory
	Rename { path: String, name: String },

	/// Copy items into a directory
	Copy {
		#[command(flatten)]
		transfer: TransferArgs,
	},

	/// Move items into a directory
	Move {
		#[command(flatten)]
		transfer: TransferArgs,
	},

	/// Delete items, into the recycle bin unless --permanent
	Delete {
		#[arg(required = true)]
		paths: Vec<String>,
		#[arg(long)]
		permanent: bool,
		/// Mark the request as an undo (no operation records are kept)
		#[arg(long)]
		undo: bool,
	},

	/// Print the MIME type for a path
	Mime { path: String },

	/// List applications that can open a file
	OpenWith { path: String },

	/// Show a file in the worker's previewer
	Preview { path: String },

	/// Manage the worker recycle bin
	Recycle {
		#[command(subcommand)]
		action: RecycleAction,
	},
}

#[derive(clap::Args, Debug)]
pub struct TransferArgs {
	#[arg(required = true)]
	pub sources: Vec<PathBuf>,
	/// Destination directory
	#[arg(long, short = 't', value_name = "DIR")]
	pub to: PathBuf,
	/// What to do when a folder name already exists in the destination; files are replaced
	#[arg(long, value_enum, default_value = "ask")]
	pub on_conflict: Conflict,
	#[arg(long)]
	pub undo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Conflict {
	/// Merge into the existing folder
	Merge,
	/// Keep both under a generated name
	KeepBoth,
	/// Ask on the terminal for every folder collision
	Ask,
}

#[derive(Subcommand, Debug)]
pub enum RecycleAction {
	/// List recycled items
	List,
	/// Permanently remove everything
	Empty,
	/// Restore one item by its recycled path
	Restore { path: String },
	/// Permanently remove one item by its recycled path
	Delete { path: String },
}

impl Commands {
	/// Name used in the output envelope.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Broker { .. } => "broker",
			Commands::Worker { .. } => "worker",
			Commands::Ping => "ping",
			Commands::Run { .. } => "run",
			Commands::Rename { .. } => "rename",
			Commands::Copy { .. } => "copy",
			Commands::Move { .. } => "move",
			Commands::Delete { .. } => "delete",
			Commands::Mime { .. } => "mime",
			Commands::OpenWith { .. } => "open-with",
			Commands::Preview { .. } => "preview",
			Commands::Recycle { action } => match action {
				RecycleAction::List => "recycle list",
				RecycleAction::Empty => "recycle empty",
				RecycleAction::Restore { .. } => "recycle restore",
				RecycleAction::Delete { .. } => "recycle delete",
			},
		}
	}
}
