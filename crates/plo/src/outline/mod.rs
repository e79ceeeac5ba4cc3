// Post-link outlining pass: sweeps window lengths from largest to smallest,
// groups duplicate windows per function, and replaces profitable groups with
// calls into newly synthesized functions.

pub mod cost;
pub mod extract;
pub mod fingerprint;
pub mod group;
pub mod predicates;
pub mod rewrite;
pub mod simplify;
pub mod synth;

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::program::{Arch, Program};
use extract::{ExtractStats, extract_windows};
use group::{ClaimSet, collect_group};
use predicates::RejectReason;
use rewrite::{SequenceLocation, find_locations, needs_sandwich, replace_with_call};

/// Pass configuration. Defaults mirror the host option defaults; `enabled`
/// is on for direct library users and off when built from flags, where the
/// master switch governs.
#[derive(Debug, Clone)]
pub struct OutlineOptions {
    pub enabled: bool,
    /// Upper bound on window length (Lmax).
    pub max_length: usize,
    /// Lower bound on window length, clamped to at least 2.
    pub min_length: usize,
    /// Profile-based filtering of hot functions and blocks.
    pub pgo: bool,
    /// Emit per-function diagnostic counters.
    pub debug: bool,
}

impl Default for OutlineOptions {
    fn default() -> Self {
        Self { enabled: true, max_length: 32, min_length: 2, pgo: false, debug: false }
    }
}

impl OutlineOptions {
    /// Parse `name = value` option lines. Only the recognized
    /// `post-link-outlining` options are accepted; outlining stays disabled
    /// unless the master switch turns it on.
    pub fn from_flags(src: &str) -> Result<Self> {
        let mut opts = Self { enabled: false, ..Self::default() };
        for (idx, raw) in src.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = line.split_once('=').ok_or_else(|| Error::Parse {
                line: idx + 1,
                message: "expected 'name = value'".to_string(),
            })?;
            let name = name.trim();
            let value = value.trim();
            let parse_bool = |value: &str| match value {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(Error::Parse {
                    line: idx + 1,
                    message: format!("invalid boolean '{value}'"),
                }),
            };
            let parse_int = |value: &str| {
                value.parse::<usize>().map_err(|_| Error::Parse {
                    line: idx + 1,
                    message: format!("invalid integer '{value}'"),
                })
            };
            match name {
                "enable-post-link-outlining" => opts.enabled = parse_bool(value)?,
                "post-link-outlining-length" => opts.max_length = parse_int(value)?,
                "post-link-outlining-min-length" => opts.min_length = parse_int(value)?,
                "post-link-outlining-pgo" => opts.pgo = parse_bool(value)?,
                "post-link-outlining-debug" => opts.debug = parse_bool(value)?,
                _ => {
                    return Err(Error::Parse {
                        line: idx + 1,
                        message: format!("unknown option '{name}'"),
                    });
                }
            }
        }
        Ok(opts)
    }
}

/// Counters reported by one pass run.
#[derive(Debug, Default, Clone)]
pub struct PassStats {
    /// Function-by-length episodes visited.
    pub episodes: usize,
    pub windows_extracted: usize,
    pub windows_rejected: usize,
    pub rejects: HashMap<RejectReason, usize>,
    pub groups_admitted: usize,
    pub groups_rejected: usize,
    pub functions_synthesized: usize,
    pub call_sites_rewritten: usize,
    pub wrappers_inlined: usize,
}

/// The outlining pass. Holds the pass-scoped counter behind the
/// `PLO_outlined_<n>` names.
#[derive(Debug)]
pub struct OutliningPass {
    opts: OutlineOptions,
    next_outlined_id: u32,
}

impl OutliningPass {
    #[must_use]
    pub fn new(opts: OutlineOptions) -> Self {
        Self { opts, next_outlined_id: 0 }
    }

    /// Run the pass over `program`. Candidate-level failures are skipped,
    /// never propagated: the worst outcome is an unchanged program.
    pub fn run(&mut self, program: &mut Program) -> Result<PassStats> {
        let mut stats = PassStats::default();
        if !self.opts.enabled {
            return Ok(stats);
        }
        if program.arch != Arch::Aarch64 {
            tracing::warn!("unsupported architecture, post-link outlining is a no-op");
            return Ok(stats);
        }

        // Hot original functions are excluded wholesale under PGO; functions
        // without profile are treated as cold.
        let hot_functions: HashSet<usize> = if self.opts.pgo {
            program
                .functions()
                .iter()
                .enumerate()
                .filter(|(_, f)| f.has_profile() && f.known_execution_count() > 1)
                .map(|(idx, _)| idx)
                .collect()
        } else {
            HashSet::new()
        };

        let original_count = program.num_functions();
        let mut synthesized: Vec<usize> = Vec::new();

        let min_length = self.opts.min_length.max(2);
        for len in (min_length..=self.opts.max_length).rev() {
            for func_idx in 0..original_count {
                {
                    let function = program.function(func_idx);
                    if function.injected || function.ignored || function.is_empty() {
                        continue;
                    }
                }
                if hot_functions.contains(&func_idx) {
                    continue;
                }
                stats.episodes += 1;
                self.run_episode(program, func_idx, len, &mut stats, &mut synthesized);
            }
        }

        for &idx in &synthesized {
            synth::shrink_wrap(program.function_mut(idx));
        }
        stats.wrappers_inlined = simplify::inline_call_wrappers(program, self.opts.debug);

        if self.opts.debug {
            tracing::debug!(
                episodes = stats.episodes,
                extracted = stats.windows_extracted,
                rejected = stats.windows_rejected,
                admitted = stats.groups_admitted,
                synthesized = stats.functions_synthesized,
                rewritten = stats.call_sites_rewritten,
                inlined = stats.wrappers_inlined,
                "post-link outlining finished"
            );
        }
        Ok(stats)
    }

    /// One extraction/grouping/rewrite episode: a single function at a
    /// single window length.
    fn run_episode(
        &mut self,
        program: &mut Program,
        func_idx: usize,
        len: usize,
        stats: &mut PassStats,
        synthesized: &mut Vec<usize>,
    ) {
        let mut extract_stats = ExtractStats::default();
        let windows =
            extract_windows(program.function(func_idx), len, &self.opts, &mut extract_stats);
        stats.windows_extracted += extract_stats.extracted;
        stats.windows_rejected += extract_stats.rejected;
        for (&reason, &count) in &extract_stats.rejects {
            *stats.rejects.entry(reason).or_insert(0) += count;
        }

        let mut claims = ClaimSet::new();
        for anchor in 0..windows.len() {
            if claims.contains(&anchor) {
                continue;
            }
            let group = collect_group(&windows, anchor, &mut claims);
            let window = &windows[anchor];

            let release = |claims: &mut ClaimSet| {
                for &member in &group.members[1..] {
                    claims.remove(&member);
                }
            };

            let locations =
                find_locations(program.function(func_idx), window, self.opts.pgo);
            if locations.is_empty() {
                release(&mut claims);
                continue;
            }
            // The grouper can overcount relative to what is physically
            // materialized; distrust groups with too few real sites.
            if locations.len() < group.frequency / 2 {
                release(&mut claims);
                stats.groups_rejected += 1;
                continue;
            }

            let decision =
                cost::evaluate(program.function(func_idx), window, &locations, self.opts.pgo);
            if self.opts.debug {
                tracing::debug!(
                    function = %program.function(func_idx).name,
                    len,
                    frequency = group.frequency,
                    sites = locations.len(),
                    weighted = decision.weighted_frequency,
                    saved = decision.saved_bytes,
                    cost = decision.cost_bytes,
                    threshold = decision.threshold,
                    pure = decision.pure_body,
                    admit = decision.admit,
                    "cost decision"
                );
            }
            if !decision.admit {
                release(&mut claims);
                stats.groups_rejected += 1;
                continue;
            }

            // Per-site trampoline choices are pinned before any rewrite so
            // later replacements cannot flip earlier decisions.
            let mut sites: Vec<(SequenceLocation, bool)> = locations
                .into_iter()
                .map(|loc| {
                    let sandwich = needs_sandwich(program.function(func_idx), &loc);
                    (loc, sandwich)
                })
                .collect();

            let Some(new_idx) = synth::synthesize(
                program,
                window,
                decision.any_sandwich,
                &mut self.next_outlined_id,
            ) else {
                tracing::warn!(
                    function = %program.function(func_idx).name,
                    "synthesis failed, abandoning candidate"
                );
                continue;
            };
            synthesized.push(new_idx);
            stats.functions_synthesized += 1;

            let callee = program
                .symbols
                .get(&program.function(new_idx).name)
                .expect("injected function symbol exists");

            sites.sort_by(|a, b| {
                a.0.block.cmp(&b.0.block).then(b.0.start.cmp(&a.0.start))
            });
            for (loc, sandwich) in &sites {
                if replace_with_call(program.function_mut(func_idx), loc, callee, *sandwich) {
                    stats.call_sites_rewritten += 1;
                }
            }
            stats.groups_admitted += 1;
        }
    }
}
