//! `deepthink lanes`: configured lanes.

use anyhow::Result;

use crate::cli::output::{list_table, output, render_list, usd, CommandOutput};
use crate::domain::models::{Config, LaneConfig};

#[derive(Debug, serde::Serialize)]
pub struct LaneListOutput {
    pub default_lane: String,
    pub lanes: Vec<LaneConfig>,
}

impl CommandOutput for LaneListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "candidates", "solver", "judge", "budget", "description"]);
        for lane in &self.lanes {
            let id = if lane.id == self.default_lane {
                format!("{} *", lane.id)
            } else {
                lane.id.clone()
            };
            table.add_row(vec![
                id,
                lane.effective_candidate_count().to_string(),
                lane.solver_model.clone(),
                lane.judge_model.clone().unwrap_or_else(|| "-".to_string()),
                usd(lane.budget_cap_usd),
                lane.description.clone(),
            ]);
        }
        render_list("lane", &table, self.lanes.len())
    }
}

pub fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let out = LaneListOutput {
        default_lane: config.default_lane.clone(),
        lanes: config.lanes.clone(),
    };
    output(&out, json_mode);
    Ok(())
}
