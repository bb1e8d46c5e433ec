use std::env;
use std::fs;

use wfwx_datamart::{Client, ClientOptions, DownloadOutcome, QuerySpec};

fn main() {
    let args: Vec<String> = env::args().collect();
    let Some(spec_path) = args.get(1) else {
        eprintln!(
            "Usage:\n  cargo run --example cli -- <query.json> [communities.geojson]\n\nExample query.json:\n  {{\"out_path\": \"downloads\", \"data_type\": \"dailies\",\n   \"start_date\": \"2021060100\", \"end_date\": \"2021060523\",\n   \"query_method\": \"station\", \"query_names\": [\"KNIFE\"]}}\n\nNotes:\n- This will contact the BCWS weather datamart."
        );
        return;
    };

    let text = match fs::read_to_string(spec_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("cannot read {spec_path}: {e}");
            std::process::exit(2);
        }
    };
    let spec: QuerySpec = match serde_json::from_str(&text) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("invalid query file: {e}");
            std::process::exit(2);
        }
    };

    let opts = ClientOptions {
        communities_path: args.get(2).map(Into::into),
        ..ClientOptions::default()
    };
    let client = Client::new(opts).expect("create client");

    match client.download(&spec) {
        Ok(DownloadOutcome::Saved { path, rows, queries }) => {
            println!("Saved {rows} rows from {queries} queries to {}", path.display());
        }
        Ok(DownloadOutcome::NoData) => {
            println!("No data found for the requested parameters.");
        }
        Err(e) => {
            eprintln!("download failed: {e}");
            std::process::exit(1);
        }
    }
}
