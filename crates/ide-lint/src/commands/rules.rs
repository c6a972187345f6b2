use crate::cli::RulesArgs;
use anyhow::Result;
use orchestrator::AnalysisOrchestrator;

pub async fn run(orchestrator: &AnalysisOrchestrator, args: RulesArgs) -> Result<()> {
    let Some(rule) = orchestrator.get_rule(&args.key, true).await? else {
        anyhow::bail!("Rule {} not found", args.key);
    };

    if args.connection.json {
        println!("{}", serde_json::to_string_pretty(&rule)?);
        return Ok(());
    }

    println!("{} ({})", rule.name, rule.key);
    if let Some(severity) = &rule.severity {
        println!("  Severity: {severity}");
    }
    if let Some(rule_type) = &rule.rule_type {
        println!("  Type: {rule_type}");
    }
    if !rule.description.is_empty() {
        println!();
        println!("{}", rule.description);
    }
    Ok(())
}
