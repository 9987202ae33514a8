//! Prompt and seed resolution for generation items.

use crate::config::{GenerationParams, KeywordMode};
use crate::errors::{GenflowError, Result, ValidationError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::{Captures, Regex};

const PLACEHOLDER_PATTERN: &str = r"\{(keyword|index|variation)\}";

/// The prompt resolved for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrompt {
    /// Prompt text sent to the provider.
    pub text: String,
    /// Keyword substituted into it, if any.
    pub keyword: Option<String>,
}

/// Resolves prompts and seeds for every item of a run.
///
/// Items are numbered `0..count * variations`; consecutive items share a
/// generation group of `variations` items. In sequential mode every item of
/// a group uses the same keyword.
#[derive(Debug, Clone)]
pub struct PromptPlan {
    template: Option<String>,
    keywords: Vec<String>,
    mode: KeywordMode,
    variations: u32,
    seed: Option<u32>,
    placeholder: Regex,
}

impl PromptPlan {
    /// Builds a plan and checks that no item resolves to an empty prompt.
    ///
    /// `template` wins over `prompt`; both may carry `{keyword}`, `{index}`
    /// and `{variation}` placeholders. With neither, the keyword itself is
    /// the prompt.
    pub fn new(params: &GenerationParams) -> Result<Self> {
        let placeholder =
            Regex::new(PLACEHOLDER_PATTERN).map_err(|e| GenflowError::internal(e.to_string()))?;

        let template = params
            .template
            .as_deref()
            .or(params.prompt.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        let keywords: Vec<String> = params
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();

        let plan = Self {
            template,
            keywords,
            mode: params.keyword_mode,
            variations: params.variations.max(1),
            seed: params.seed,
            placeholder,
        };
        plan.check_not_empty()?;
        Ok(plan)
    }

    fn check_not_empty(&self) -> Result<()> {
        let mut err = ValidationError::new("Invalid prompt configuration");
        if self.keywords.is_empty() {
            if self.render(None, 0, 0).is_empty() {
                err.push("generation.prompt", "resolves to an empty prompt");
            }
        } else {
            for keyword in &self.keywords {
                if self.render(Some(keyword), 0, 0).is_empty() {
                    err.push(
                        "generation.prompt",
                        format!("resolves to an empty prompt for keyword '{keyword}'"),
                    );
                }
            }
        }
        Ok(err.into_result()?)
    }

    /// A random source for keyword selection and seeds.
    ///
    /// Deterministic when the configuration fixes a seed.
    #[must_use]
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(u64::from(seed)),
            None => StdRng::from_entropy(),
        }
    }

    /// Resolves the prompt of item `index`.
    pub fn resolve(&self, index: u32, rng: &mut impl Rng) -> ResolvedPrompt {
        let group = index / self.variations;
        let variation = index % self.variations;

        let keyword = match (self.keywords.len(), self.mode) {
            (0, _) => None,
            (len, KeywordMode::Sequential) => Some(self.keywords[group as usize % len].clone()),
            (len, KeywordMode::Random) => Some(self.keywords[rng.gen_range(0..len)].clone()),
        };

        ResolvedPrompt {
            text: self.render(keyword.as_deref(), group, variation),
            keyword,
        }
    }

    /// The seed of item `index`: the fixed seed offset by the index, or a
    /// random one.
    pub fn seed_for(&self, index: u32, rng: &mut impl Rng) -> u32 {
        match self.seed {
            Some(seed) => seed.wrapping_add(index),
            None => rng.gen(),
        }
    }

    fn render(&self, keyword: Option<&str>, group: u32, variation: u32) -> String {
        let Some(template) = &self.template else {
            return keyword.unwrap_or_default().to_string();
        };

        self.placeholder
            .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
                "keyword" => keyword.unwrap_or_default().to_string(),
                "index" => (group + 1).to_string(),
                "variation" => (variation + 1).to_string(),
                other => format!("{{{other}}}"),
            })
            .trim()
            .to_string()
    }
}
