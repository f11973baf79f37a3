use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use userdir_client::client::{start_client, ClientHandle};
use userdir_client::columns::ColumnVisibility;
use userdir_client::pagination::{ClientView, UserEdit};
use userdir_common::network::{default_client_address, default_server_host};
use userdir_common::record::{UserID, UserRecord};
use userdir_common::DEFAULT_PAGE_SIZE;
use userdir_server::server::{server_main, ServerOptions};
use userdir_server::store::JsonFileStore;

#[derive(Parser, Debug)]
struct CLIArgs {
    /// Debug mode
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a user record file
    Serve {
        /// Address to listen on
        #[arg(long, default_value_t = default_server_host())]
        host: String,

        /// User record file
        #[arg(long, default_value = "data/Users.json")]
        data: PathBuf,

        /// Records per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Seconds a store read may take before the request fails
        #[arg(long, default_value_t = 10)]
        read_timeout: u64,
    },
    /// Print the user table
    List {
        /// Server url
        #[arg(default_value_t = default_client_address())]
        url: url::Url,

        /// Stop after this many pages
        #[arg(short, long)]
        pages: Option<u64>,

        /// Column visibility preferences
        #[arg(short, long, default_value = "columns.json")]
        columns: PathBuf,
    },
    /// Interactively edit one user
    Edit {
        /// User id
        id: UserID,

        /// Server url
        #[arg(default_value_t = default_client_address())]
        url: url::Url,
    },
}

fn main() -> anyhow::Result<()> {
    let cli_args = CLIArgs::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }

    if cli_args.debug {
        std::env::set_var("RUST_LOG", "debug")
    }

    env_logger::init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli_args.command {
            Command::Serve {
                host,
                data,
                page_size,
                read_timeout,
            } => {
                let opts = ServerOptions {
                    host,
                    store_path: data,
                    page_size,
                    read_timeout: Duration::from_secs(read_timeout),
                };
                log::info!("Serving users from {}", opts.store_path.display());
                let store = Arc::new(JsonFileStore::new(&opts.store_path));
                server_main(opts, store).await?;
                Ok(())
            }
            Command::List {
                url,
                pages,
                columns,
            } => command_list(url, pages, columns).await,
            Command::Edit { id, url } => command_edit(url, id).await,
        }
    })
}

/// Load pages until `done` says stop, or the server runs out of pages.
async fn load_until<F>(
    client: &ClientHandle,
    mut done: F,
) -> anyhow::Result<ClientView>
where
    F: FnMut(&ClientView) -> bool,
{
    loop {
        let view = client
            .wait_for(|v| !v.is_loading || !v.connected)
            .await?;

        if !view.connected {
            bail!("Server closed the connection");
        }

        if let Some(e) = &view.last_error {
            bail!("Server error: {e}");
        }

        if view.loaded_all || done(&view) {
            return Ok(view);
        }

        client.request_next_page()?;
    }
}

async fn command_list(
    url: url::Url,
    pages: Option<u64>,
    columns: PathBuf,
) -> anyhow::Result<()> {
    let visibility = ColumnVisibility::load(&columns);

    let (client, task) = start_client(&url).await?;

    let mut seen_pages = 0;
    let mut last_len = 0;
    let view = load_until(&client, |v| {
        if v.list.len() != last_len {
            last_len = v.list.len();
            seen_pages += 1;
        }
        pages.is_some_and(|p| seen_pages >= p)
    })
    .await?;

    print_table(&view.list, &visibility);

    client.shutdown();
    let _ = task.await;

    Ok(())
}

fn print_table(users: &[UserRecord], visibility: &ColumnVisibility) {
    let columns = visibility.visible_columns();

    let rows: Vec<Vec<String>> = users
        .iter()
        .map(|u| columns.iter().map(|c| c.cell(u)).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            rows.iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.header().len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!(
        "{}",
        line(columns.iter().map(|c| c.header().to_string()).collect())
    );
    println!(
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    );
    for row in rows {
        println!("{}", line(row));
    }
}

async fn command_edit(url: url::Url, id: UserID) -> anyhow::Result<()> {
    let (client, task) = start_client(&url).await?;

    load_until(&client, |v| v.list.iter().any(|u| u.id == id)).await?;

    if !client.activate_row(id) {
        bail!("User {id} does not exist");
    }

    let original = client
        .view()
        .editing
        .ok_or_else(|| anyhow!("Selection was lost"))?;

    let edit = tokio::task::spawn_blocking(move || prompt_edit(&original))
        .await
        .context("Prompt task failed")??;

    let Some(edit) = edit else {
        client.cancel_edit();
        println!("Cancelled.");
        client.shutdown();
        let _ = task.await;
        return Ok(());
    };

    let error_before = client.view().last_error;

    client.save_edit(edit)?;

    let view = client
        .wait_for(|v| {
            v.editing.is_none() || v.last_error != error_before || !v.connected
        })
        .await?;

    client.shutdown();
    let _ = task.await;

    if view.editing.is_some() || !view.connected {
        bail!(
            "Update failed: {}",
            view.last_error.unwrap_or_else(|| "connection lost".into())
        );
    }

    if let Some(user) = view.list.iter().find(|u| u.id == id) {
        println!("Saved: {user:?}");
    }

    Ok(())
}

fn prompt_err(e: requestty::ErrorKind) -> anyhow::Error {
    anyhow!("Prompt failed: {e:?}")
}

/// Ask for each editable field. Returns [None] if the user backs out.
fn prompt_edit(user: &UserRecord) -> anyhow::Result<Option<UserEdit>> {
    let mut edit = UserEdit::from(user);

    let text = |name: &str, message: &str, default: &str| {
        requestty::prompt_one(
            requestty::Question::input(name)
                .message(message)
                .default(default)
                .build(),
        )
        .map_err(prompt_err)
        .map(|a| a.as_string().unwrap_or(default).to_string())
    };

    edit.full_name = text("fullName", "Full name", &edit.full_name)?;
    edit.post = text("post", "Post", &edit.post)?;
    edit.address = text("address", "Address", &edit.address)?;

    let age = requestty::prompt_one(
        requestty::Question::int("age")
            .message("Age")
            .default(i64::from(edit.age))
            .validate(|v, _| {
                u32::try_from(v)
                    .map(|_| ())
                    .map_err(|_| "Age must be a non-negative number".into())
            })
            .build(),
    )
    .map_err(prompt_err)?;
    edit.age = age
        .as_int()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(edit.age);

    let salary = requestty::prompt_one(
        requestty::Question::float("salary")
            .message("Salary")
            .default(edit.salary)
            .validate(|v, _| {
                if v.is_finite() {
                    Ok(())
                } else {
                    Err("Salary must be a finite number".into())
                }
            })
            .build(),
    )
    .map_err(prompt_err)?;
    edit.salary = salary.as_float().unwrap_or(edit.salary);

    let has_tax_id = requestty::prompt_one(
        requestty::Question::confirm("hasTaxId")
            .message("Has a tax id?")
            .default(edit.has_tax_id)
            .build(),
    )
    .map_err(prompt_err)?;
    edit.has_tax_id = has_tax_id.as_bool().unwrap_or(edit.has_tax_id);

    edit.tax_id = if edit.has_tax_id {
        let tax_id = requestty::prompt_one(
            requestty::Question::int("taxId")
                .message("Tax id")
                .default(edit.tax_id.unwrap_or_default())
                .build(),
        )
        .map_err(prompt_err)?;
        tax_id.as_int()
    } else {
        None
    };

    let save = requestty::prompt_one(
        requestty::Question::confirm("save")
            .message("Save changes?")
            .default(true)
            .build(),
    )
    .map_err(prompt_err)?;

    Ok(save.as_bool().unwrap_or(false).then_some(edit))
}
