use crate::{Result, ResourceConfig, ResourceError};
use crate::core::keytypes::Path;
use crate::core::manager::Manager;
use crate::remote::client::RpcClient;
use colored::Colorize;
use std::sync::Arc;

/// Children listed before the output is cut short
const MAX_CHILDREN: usize = 20;

pub async fn execute(config: ResourceConfig, path: String, remote: Option<String>) -> Result<()> {
    let manager: Arc<dyn Manager> = match remote {
        Some(addr) => Arc::new(RpcClient::connect(&addr).await?),
        None => Arc::new(super::start_manager(config, true).await?),
    };

    let result = describe(manager.as_ref(), &path).await;
    super::shutdown(manager).await;
    result
}

async fn describe(manager: &dyn Manager, path: &str) -> Result<()> {
    let symbol = manager.resolve_symbol(&Path::new(path)).await?;

    println!("{}", symbol.path_string().cyan().bold());
    println!("{}", "─".repeat(50));
    println!("{:<14} {}", "distribution", symbol.dist().to_string().green());
    if !symbol.is_canonical() {
        println!("{:<14} {}", "queried", symbol.queried_key().path);
    }
    println!("{:<14} {}", "kind", manager.kind(&symbol).await?);

    match manager.symbol_type(&symbol).await {
        Ok(ty) => println!("{:<14} {}", "type", ty),
        Err(ResourceError::NoType(_)) => {}
        Err(e) => println!("{:<14} {}", "type", e.to_string().dimmed()),
    }

    if let Some(doc) = manager.documentation(&symbol).await? {
        let summary = doc.text.lines().next().unwrap_or_default();
        if !summary.is_empty() {
            println!("{:<14} {}", "docs", summary);
        }
    }

    let returns = manager.return_types(&symbol).await?;
    if !returns.is_empty() {
        let names: Vec<String> = returns.iter().map(|r| r.path_string()).collect();
        println!("{:<14} {}", "returns", names.join(", ").yellow());
    }

    let children = manager.children(&symbol).await?;
    if !children.is_empty() {
        let shown: Vec<&str> = children.iter().take(MAX_CHILDREN).map(String::as_str).collect();
        let more = children.len().saturating_sub(MAX_CHILDREN);
        let suffix = if more > 0 {
            format!(" (+{} more)", more)
        } else {
            String::new()
        };
        println!("{:<14} {}{}", "children", shown.join(", "), suffix.dimmed());
    }

    Ok(())
}
