use crate::infra::CatalogFixture;
use campaign_engine::campaigns::{
    CacheInfo, CampaignEvaluationResult, CampaignQuery, UsuarioId,
};
use campaign_engine::config::CampaignConfig;
use campaign_engine::error::AppError;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct EvaluateArgs {
    /// Portal user id to evaluate
    #[arg(long)]
    pub(crate) user: i64,
    /// Evaluate a single campaign by slug instead of the full listing
    #[arg(long)]
    pub(crate) slug: Option<String>,
    /// Snapshot TTL override in seconds
    #[arg(long)]
    pub(crate) ttl: Option<u64>,
    /// Include campaigns outside their active range
    #[arg(long)]
    pub(crate) include_upcoming: bool,
    /// JSON catalogue fixture (defaults to the bundled demo catalogue)
    #[arg(long)]
    pub(crate) fixtures: Option<PathBuf>,
}

pub(crate) async fn run_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let EvaluateArgs {
        user,
        slug,
        ttl,
        include_upcoming,
        fixtures,
    } = args;

    let service = CatalogFixture::load(fixtures.as_deref())?.into_service(CampaignConfig::default());
    let session = service.resolve_user(Some(UsuarioId(user)))?;
    let query = CampaignQuery {
        ttl_seconds: ttl,
        include_upcoming,
    };

    println!(
        "Campaign evaluation for usuario {} ({})",
        session.id,
        session.rol.as_deref().unwrap_or("sin rol")
    );

    match slug {
        Some(slug) => {
            let detail = service.detail_for_user(&session, &slug, &query).await?;
            render_evaluation(
                &detail.campaign.name,
                &detail.campaign.slug,
                &detail.evaluation,
                &detail.cache,
            );
            if !detail.rewards.is_empty() {
                println!("  Rewards:");
                for reward in &detail.rewards {
                    println!("    - {}", reward.title);
                }
            }
        }
        None => {
            let listing = service.list_for_user(&session, &query).await?;
            if listing.campaigns.is_empty() {
                println!("No campaigns visible to this user.");
                return Ok(());
            }
            for item in &listing.campaigns {
                render_evaluation(
                    &item.campaign.name,
                    &item.campaign.slug,
                    &item.evaluation,
                    &item.cache,
                );
            }
        }
    }

    Ok(())
}

fn render_evaluation(
    name: &str,
    slug: &str,
    evaluation: &CampaignEvaluationResult,
    cache: &CacheInfo,
) {
    println!();
    println!("{name} [{slug}]");
    println!(
        "  Status: {} | Progress: {:.0}% | Eligible: {}",
        evaluation.status.as_str(),
        evaluation.progress * 100.0,
        if evaluation.eligible { "yes" } else { "no" }
    );
    println!(
        "  Cache: {}",
        if cache.from_cache { "hit" } else { "miss" }
    );
    for rule in &evaluation.rule_results {
        let label = rule.description.as_deref().unwrap_or(rule.kind.as_str());
        println!(
            "    [{}] {} ({})",
            if rule.passed { "x" } else { " " },
            label,
            rule.scope.label()
        );
    }
}
