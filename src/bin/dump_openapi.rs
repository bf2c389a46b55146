use std::fs;

/// Prints the OpenAPI document, or writes it to the path given as the first argument.
fn main() -> anyhow::Result<()> {
    let port = permission_gate::Settings::from_env()?.port;
    let doc = permission_gate::docs::build_openapi(port)?;
    let s = serde_json::to_string_pretty(&doc)?;

    match std::env::args().nth(1) {
        Some(path) => {
            fs::write(&path, s)?;
            eprintln!("wrote {}", path);
        }
        None => println!("{}", s),
    }
    Ok(())
}
