//! Subcommands of the `orders` binary and the mapping of their failures to
//! process exit codes.

use clap::Subcommand;
use orders_config::{ConfigError, ServiceConfig};
use orders_core::{OperationContext, OrderStore, OrderStoreError};
use orders_storage::StorageError;
use orders_types::{FindAllPage, Order};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Store operations exposed on the command line.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
	/// Create an order from a JSON document (`-` reads stdin)
	Insert { input: PathBuf },
	/// Replace an existing order with a JSON document (`-` reads stdin)
	Update { input: PathBuf },
	/// Print an order as JSON
	Get { id: u64 },
	/// Delete an order
	Delete { id: u64 },
	/// Print one page of orders as JSON lines
	List {
		/// Index members to scan for this page [default: service.default_page_size]
		#[arg(long)]
		size: Option<u64>,
		/// Cursor returned by the previous page
		#[arg(long, default_value_t = 0)]
		cursor: u64,
		/// Follow cursors until every order has been printed
		#[arg(long, conflicts_with = "cursor")]
		all: bool,
	},
	/// Remove expired keys from the backend
	Cleanup,
}

/// Errors surfaced by the binary.
#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("{0}")]
	Setup(Box<dyn std::error::Error>),
	#[error("Invalid order input: {0}")]
	Input(String),
	#[error(transparent)]
	Store(#[from] OrderStoreError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl CliError {
	/// Process exit code for this failure.
	pub fn exit_code(&self) -> u8 {
		match self {
			CliError::Config(_) | CliError::Setup(_) => 2,
			CliError::Input(_) => 5,
			CliError::Store(e) if e.is_not_found() => 3,
			CliError::Store(e) if e.is_conflict() => 4,
			CliError::Store(OrderStoreError::InvalidOrderId | OrderStoreError::Encoding(_)) => 5,
			_ => 1,
		}
	}
}

/// Runs subcommands against one store, deriving a fresh deadline for every
/// store call from the service configuration.
pub struct Runner {
	store: OrderStore,
	service: ServiceConfig,
	shutdown: OperationContext,
}

impl Runner {
	/// `shutdown` is the root context; cancelling it cancels any call in flight.
	pub fn new(store: OrderStore, service: ServiceConfig, shutdown: OperationContext) -> Self {
		Self {
			store,
			service,
			shutdown,
		}
	}

	fn context(&self) -> OperationContext {
		let ctx = self.shutdown.child();
		match self.service.operation_timeout() {
			Some(timeout) => ctx.deadline_in(timeout),
			None => ctx,
		}
	}

	/// Executes `command`, writing results to `out`.
	pub async fn run(&self, command: Command, out: &mut impl Write) -> Result<(), CliError> {
		match command {
			Command::Insert { input } => {
				let order = read_order(&input).await?;
				self.store.insert(&self.context(), &order).await?;
				tracing::info!(order_id = order.order_id, "Inserted order");
			},
			Command::Update { input } => {
				let order = read_order(&input).await?;
				self.store.update(&self.context(), &order).await?;
				tracing::info!(order_id = order.order_id, "Updated order");
			},
			Command::Get { id } => {
				let order = self.store.find_by_id(&self.context(), id).await?;
				write_json(out, &order, true)?;
			},
			Command::Delete { id } => {
				self.store.delete_by_id(&self.context(), id).await?;
				tracing::info!(order_id = id, "Deleted order");
			},
			Command::List { size, cursor, all } => {
				let size = size.unwrap_or(self.service.default_page_size);
				let mut page = Some(FindAllPage {
					size,
					offset: cursor,
				});

				while let Some(current) = page {
					let result = self.store.find_all(&self.context(), current).await?;
					for order in &result.orders {
						write_json(out, order, false)?;
					}
					page = current.next(&result);
					if !all {
						eprintln!("next cursor: {}", result.cursor);
						break;
					}
				}
			},
			Command::Cleanup => {
				let removed = self.store.storage().cleanup_expired().await?;
				tracing::info!(removed, "Removed expired keys");
				writeln!(out, "{}", removed)?;
			},
		}
		Ok(())
	}
}

async fn read_order(input: &Path) -> Result<Order, CliError> {
	let content = if input == Path::new("-") {
		let mut buf = String::new();
		tokio::io::stdin().read_to_string(&mut buf).await?;
		buf
	} else {
		tokio::fs::read_to_string(input).await?
	};

	serde_json::from_str(&content).map_err(|e| CliError::Input(e.to_string()))
}

fn write_json(out: &mut impl Write, order: &Order, pretty: bool) -> Result<(), CliError> {
	let json = if pretty {
		serde_json::to_string_pretty(order)
	} else {
		serde_json::to_string(order)
	}
	.map_err(OrderStoreError::Encoding)?;
	writeln!(out, "{}", json)?;
	Ok(())
}
