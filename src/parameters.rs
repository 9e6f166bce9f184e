use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::movegen::MAX_MOVES;
use crate::search::MAX_PLY;

fn empty_lmr_table() -> Vec<i32> {
    vec![0; MAX_PLY * MAX_MOVES]
}

/// Every search tunable in one place, JSON-round-trippable so parameter
/// sweeps can run against a file instead of a rebuild.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchParameters {
    // Late move reductions
    pub lmr_base: f64,
    pub lmr_divisor: f64,
    pub lmr_history_div: i32,

    // History bonus law
    pub stat_bonus_quad: i32,
    pub stat_bonus_linear: i32,
    pub stat_bonus_max: i32,
    pub stat_bonus_boost_at: i32,

    // Pre-move pruning
    pub razoring_depth_mul: i32,
    pub rfp_depth_mul: i32,
    pub nmp_base: i32,
    pub nmp_depth_div: i32,
    pub nmp_eval_div: i32,
    pub nmp_eval_div_min: i32,

    // In-loop pruning
    pub lmp_base: i32,
    pub lmp_quad: i32,
    pub pvs_see_margin: i32,
    pub futility_base: i32,
    pub futility_depth_mul: i32,

    // Aspiration windows
    pub asp_window_start_depth: i32,
    pub asp_window_start_delta: i32,
    pub asp_fail_high_reduction_max: i32,

    #[serde(skip, default = "empty_lmr_table")]
    lmr_table: Vec<i32>,
}

impl Default for SearchParameters {
    fn default() -> Self {
        let mut params = Self {
            lmr_base: 0.25,
            lmr_divisor: 2.25,
            lmr_history_div: 8000,

            stat_bonus_quad: 2,
            stat_bonus_linear: 64,
            stat_bonus_max: 1200,
            stat_bonus_boost_at: 110,

            razoring_depth_mul: 400,
            rfp_depth_mul: 120,
            nmp_base: 4,
            nmp_depth_div: 3,
            nmp_eval_div: 200,
            nmp_eval_div_min: 3,

            lmp_base: 7,
            lmp_quad: 2,
            pvs_see_margin: -140,
            futility_base: 180,
            futility_depth_mul: 120,

            asp_window_start_depth: 4,
            asp_window_start_delta: 10,
            asp_fail_high_reduction_max: 11,

            lmr_table: empty_lmr_table(),
        };
        params.recalculate_tables();
        params
    }
}

impl SearchParameters {
    /// lmr(d, m) = base + ln(d)·ln(m) / divisor, truncated.
    pub fn recalculate_tables(&mut self) {
        for d in 1..MAX_PLY {
            for m in 1..MAX_MOVES {
                self.lmr_table[d * MAX_MOVES + m] =
                    (self.lmr_base + (d as f64).ln() * (m as f64).ln() / self.lmr_divisor) as i32;
            }
        }
    }

    #[inline(always)]
    pub fn lmr(&self, depth: i32, moves: i32) -> i32 {
        let d = (depth.max(0) as usize).min(MAX_PLY - 1);
        let m = (moves.max(0) as usize).min(MAX_MOVES - 1);
        self.lmr_table[d * MAX_MOVES + m]
    }

    pub fn save_to_json(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn load_from_json(path: &str) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut params: SearchParameters = serde_json::from_reader(reader)?;
        params.recalculate_tables();
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lmr_table_matches_formula() {
        let params = SearchParameters::default();
        assert_eq!(params.lmr(1, 1), 0);
        let expected = (0.25 + (20f64).ln() * (10f64).ln() / 2.25) as i32;
        assert_eq!(params.lmr(20, 10), expected);
        // Reductions grow with both depth and move number
        assert!(params.lmr(30, 30) > params.lmr(5, 5));
    }

    #[test]
    fn json_round_trip_preserves_tunables() {
        let dir = std::env::temp_dir().join("aurora_params_test.json");
        let path = dir.to_str().unwrap();

        let mut params = SearchParameters::default();
        params.razoring_depth_mul = 450;
        params.save_to_json(path).unwrap();

        let loaded = SearchParameters::load_from_json(path).unwrap();
        assert_eq!(loaded.razoring_depth_mul, 450);
        assert_eq!(loaded.lmr(20, 10), params.lmr(20, 10));
        let _ = std::fs::remove_file(path);
    }
}
