use arcgate::GatewayConfig;
use arcgate_http::serve;
use clap::Parser;

#[derive(Parser)]
#[command(name = "arcgate", about = "Search gateway for Elasticsearch-compatible clusters")]
struct Cli {
    /// Engine base URL; credentials may be embedded as user:pass@host
    #[arg(long, env = "ES_CLUSTER_URL")]
    es_cluster_url: Option<String>,
    #[arg(long, env = "ARC_BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind_addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(url) = &cli.es_cluster_url {
        std::env::set_var("ES_CLUSTER_URL", url);
    }
    std::env::set_var("ARC_BIND_ADDR", &cli.bind_addr);

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    serve(config).await
}
