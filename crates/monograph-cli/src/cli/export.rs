use crate::cli::ExportArgs;
use crate::config::CliConfig;
use anyhow::Result;
use std::io::Write;

pub async fn run(args: ExportArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;

    let output = match args.format.as_str() {
        "note" => serde_json::to_string_pretty(&engine.export(&args.collection)?)?,
        "sections" => {
            serde_json::to_string_pretty(&engine.importer().export_sections(&args.collection)?)?
        }
        other => anyhow::bail!("Unknown export format: {}", other),
    };

    if let Some(out_path) = args.output {
        std::fs::write(&out_path, &output)?;
        println!("Exported to {}", out_path.display());
    } else {
        std::io::stdout().write_all(output.as_bytes())?;
        println!();
    }

    Ok(())
}
