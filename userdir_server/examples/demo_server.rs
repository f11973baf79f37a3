use std::sync::Arc;

use userdir_common::record::UserRecord;
use userdir_server::server::{server_main, ServerOptions};
use userdir_server::store::MemoryStore;

fn setup(count: u64) -> Vec<UserRecord> {
    log::debug!("Generating {count} users");

    (1..=count)
        .map(|id| UserRecord {
            id,
            full_name: format!("Demo User {id}"),
            post: if id % 5 == 0 { "Manager" } else { "Engineer" }.to_string(),
            address: format!("{id} Demo Street"),
            age: 20 + (id % 45) as u32,
            salary: 40_000.0 + (id * 250) as f64,
            has_tax_id: Some(id % 3 != 0),
            tax_id: (id % 3 != 0).then_some(7_700_000_000 + id as i64),
        })
        .collect()
}

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("Connect clients to ws://localhost:3001");
    let opts = ServerOptions::default();

    let store = Arc::new(MemoryStore::new(setup(100)));

    if let Err(e) = server_main(opts, store).await {
        log::error!("Server failed: {e}");
    }
}
