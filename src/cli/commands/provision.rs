//! `deepthink provision`: create a user's default profile.

use anyhow::Result;
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::{output, usd, CommandOutput};
use crate::domain::models::{nanos_to_usd, Config};
use crate::services::ElevatedAuthority;

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// User to provision
    pub user_id: String,

    /// Recorded as the provisioning actor
    #[arg(long, default_value = "deepthink provision")]
    pub actor: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ProvisionOutput {
    pub user_id: String,
    pub created: bool,
    pub default_lane: String,
    pub budget_cap_usd: f64,
    pub provisioned_by: String,
}

impl CommandOutput for ProvisionOutput {
    fn to_human(&self) -> String {
        let verb = if self.created { "Provisioned" } else { "Already provisioned" };
        format!(
            "{} {} (lane {}, budget {}, by {})",
            verb,
            self.user_id,
            self.default_lane,
            usd(self.budget_cap_usd),
            self.provisioned_by
        )
    }
}

pub async fn execute(args: ProvisionArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let authority = ElevatedAuthority::assume(args.actor, "explicit account provisioning");
    let outcome = ctx.provisioner().provision(&authority, &args.user_id).await?;

    let out = ProvisionOutput {
        user_id: outcome.profile.user_id,
        created: outcome.created,
        default_lane: outcome.profile.default_lane,
        budget_cap_usd: nanos_to_usd(outcome.profile.budget_cap_nanos),
        provisioned_by: outcome.profile.provisioned_by,
    };
    output(&out, json_mode);
    Ok(())
}
