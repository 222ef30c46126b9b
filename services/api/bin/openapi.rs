use clap::Parser;
use std::path::PathBuf;
use teachback_api::router::ApiDoc;
use utoipa::OpenApi;

/// Writes the OpenAPI document for the REST API.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Where to write the document.
    #[arg(short, long, default_value = "openapi.json")]
    output: PathBuf,
}

/// Generates the OpenAPI specification and writes it to a file.
fn generate_spec(
    api_doc: utoipa::openapi::OpenApi,
    path: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = api_doc.to_pretty_json()?;
    std::fs::write(path, spec_json)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    generate_spec(ApiDoc::openapi(), &args.output)?;
    println!("Wrote {}", args.output.display());
    Ok(())
}
