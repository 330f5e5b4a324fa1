//! Crate-wide configuration (SPEC_FULL.md §A.3), generalized from the base
//! crate's `RAGConfig` shape but defaulting to this engine's fixed constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub bm25: Bm25Config,
    pub rrf: RrfConfig,
    pub reranker: RerankerConfig,
    pub mmr: MmrConfig,
    pub gating: GatingConfig,
    pub context: ContextConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrfConfig {
    pub k_rrf: f32,
    pub w_vector: f32,
    pub w_keyword: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub w_keyword: f32,
    pub w_proximity: f32,
    pub w_position: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmrConfig {
    pub lambda_strict: f32,
    pub lambda_default: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatingConfig {
    pub min_sim_strict: f32,
    pub min_sim_default: f32,
    pub override_top_high: f32,
    pub override_top_mid: f32,
    pub override_top_avg_gap: f32,
    pub override_top_second_gap: f32,
    pub strict_block_threshold: f32,
    pub strict_block_min_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_chars_cloud: usize,
    pub max_chars_tiny_ondevice: usize,
    pub max_chars_default: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub enable_reranking: bool,
    pub enable_mmr: bool,
    pub enable_tool_calls: bool,
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.bm25.k1 <= 0.0 {
            return Err("bm25.k1 must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err("bm25.b must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.rrf.w_vector) || !(0.0..=1.0).contains(&self.rrf.w_keyword)
        {
            return Err("rrf weights must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.mmr.lambda_strict)
            || !(0.0..=1.0).contains(&self.mmr.lambda_default)
        {
            return Err("mmr lambda must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.gating.min_sim_strict)
            || !(0.0..=1.0).contains(&self.gating.min_sim_default)
        {
            return Err("gating thresholds must be in [0.0, 1.0]".into());
        }
        if self.context.max_chars_default == 0 {
            return Err("context.max_chars_default must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retrieval-engine");

        Self {
            data_dir,
            embedding: EmbeddingConfig {
                dimension: 512,
                cache_size: 1000,
            },
            bm25: Bm25Config { k1: 1.5, b: 0.75 },
            rrf: RrfConfig {
                k_rrf: 60.0,
                w_vector: 0.7,
                w_keyword: 0.3,
            },
            reranker: RerankerConfig {
                w_keyword: 0.20,
                w_proximity: 0.15,
                w_position: 0.05,
            },
            mmr: MmrConfig {
                lambda_strict: 0.75,
                lambda_default: 0.70,
            },
            gating: GatingConfig {
                min_sim_strict: 0.52,
                min_sim_default: 0.35,
                override_top_high: 0.50,
                override_top_mid: 0.38,
                override_top_avg_gap: 0.05,
                override_top_second_gap: 0.07,
                strict_block_threshold: 0.52,
                strict_block_min_count: 3,
            },
            context: ContextConfig {
                max_chars_cloud: 200_000,
                max_chars_tiny_ondevice: 1_500,
                max_chars_default: 3_500,
            },
            features: FeatureFlags {
                enable_reranking: true,
                enable_mmr: true,
                enable_tool_calls: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let c = EngineConfig::default();
        assert_eq!(c.bm25.k1, 1.5);
        assert_eq!(c.bm25.b, 0.75);
        assert_eq!(c.rrf.k_rrf, 60.0);
        assert_eq!(c.rrf.w_vector, 0.7);
        assert_eq!(c.rrf.w_keyword, 0.3);
        assert_eq!(c.mmr.lambda_strict, 0.75);
        assert_eq!(c.mmr.lambda_default, 0.70);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_bad_bm25_b() {
        let mut c = EngineConfig::default();
        c.bm25.b = 1.5;
        assert!(c.validate().is_err());
    }
}
