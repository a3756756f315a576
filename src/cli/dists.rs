use crate::{Result, ResourceConfig};
use crate::core::manager::Manager;
use colored::Colorize;

pub async fn execute(config: ResourceConfig, package: Option<String>) -> Result<()> {
    let manager = super::start_manager(config, true).await?;

    let dists = match &package {
        Some(name) => manager.distributions_for_package(name).await?,
        None => manager.distributions().await?,
    };

    if dists.is_empty() {
        match package {
            Some(name) => println!("No distributions provide {}", name),
            None => println!("No distributions in manifest"),
        }
        manager.close().await?;
        return Ok(());
    }

    println!("Distributions:");
    println!("{}", "─".repeat(50));
    for dist in &dists {
        let toplevels = manager.top_levels(dist).await.unwrap_or_default();
        println!(
            "{} {} {}",
            dist.name.cyan(),
            dist.version.green(),
            format!("[{}]", toplevels.join(", ")).dimmed()
        );
    }
    println!("{}", "─".repeat(50));
    println!("Total: {} distributions", dists.len().to_string().bold());

    manager.close().await
}
