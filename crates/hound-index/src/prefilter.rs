//! Lowering of a search regex into a boolean expression over required
//! trigrams, used to select candidate files before confirmation.
//!
//! The lowering must preserve the candidate-superset property: every file the
//! regex can match must satisfy the expression. Anything the model cannot
//! express widens to `All` rather than risk a false negative.

use regex_syntax::hir::{Class, Hir, HirKind};

use crate::trigram::{pack, Trigram};

/// Character classes with more than this many members contribute nothing.
const CLASS_EXPANSION_LIMIT: usize = 4;
/// A literal run expanding to more variants than this widens to `All`.
const MAX_VARIANTS: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrigramExpr {
    /// No constraint; every file is a candidate.
    All,
    /// Files containing this trigram.
    Lit(Trigram),
    /// Files satisfying every branch.
    And(Vec<TrigramExpr>),
    /// Files satisfying at least one branch.
    Or(Vec<TrigramExpr>),
}

impl TrigramExpr {
    pub fn is_all(&self) -> bool {
        matches!(self, TrigramExpr::All)
    }

    fn and(mut parts: Vec<TrigramExpr>) -> TrigramExpr {
        parts.retain(|p| !p.is_all());
        match parts.len() {
            0 => TrigramExpr::All,
            1 => parts.pop().expect("len checked"),
            _ => TrigramExpr::And(parts),
        }
    }

    fn or(parts: Vec<TrigramExpr>) -> TrigramExpr {
        if parts.is_empty() || parts.iter().any(|p| p.is_all()) {
            return TrigramExpr::All;
        }
        if parts.len() == 1 {
            return parts.into_iter().next().expect("len checked");
        }
        TrigramExpr::Or(parts)
    }
}

/// Lower `pattern` into a trigram expression. A pattern that fails to parse
/// lowers to `All`; matching will then reject it separately.
pub fn lower(pattern: &str, ignore_case: bool) -> TrigramExpr {
    let mut parser = regex_syntax::ParserBuilder::new().utf8(false).build();
    match parser.parse(pattern) {
        Ok(hir) => lower_hir(&hir, ignore_case),
        Err(_) => TrigramExpr::All,
    }
}

fn lower_hir(h: &Hir, fold: bool) -> TrigramExpr {
    match h.kind() {
        HirKind::Empty | HirKind::Look(_) => TrigramExpr::All,
        HirKind::Literal(lit) => {
            let mut run = VariantRun::new(fold);
            run.push_bytes(&lit.0);
            run.into_expr()
        }
        // A class on its own is a single byte; no trigram can be required.
        HirKind::Class(_) => TrigramExpr::All,
        HirKind::Repetition(rep) => {
            if rep.min == 0 {
                TrigramExpr::All
            } else {
                lower_hir(&rep.sub, fold)
            }
        }
        HirKind::Capture(cap) => lower_hir(&cap.sub, fold),
        HirKind::Alternation(subs) => {
            let branches: Vec<TrigramExpr> = subs.iter().map(|s| lower_hir(s, fold)).collect();
            TrigramExpr::or(branches)
        }
        HirKind::Concat(subs) => lower_concat(subs, fold),
    }
}

/// Concatenation: contiguous literal and small-class children accumulate into
/// a variant set; everything else flushes the run and contributes its own
/// lowering as a conjunct.
fn lower_concat(subs: &[Hir], fold: bool) -> TrigramExpr {
    let mut parts: Vec<TrigramExpr> = Vec::new();
    let mut run = VariantRun::new(fold);
    for sub in subs {
        match sub.kind() {
            HirKind::Literal(lit) => run.push_bytes(&lit.0),
            HirKind::Class(class) => {
                if let Some(alts) = small_class_bytes(class, fold) {
                    run.push_alternatives(&alts);
                } else {
                    run.flush_into(&mut parts);
                }
            }
            HirKind::Empty | HirKind::Look(_) => {}
            _ => {
                run.flush_into(&mut parts);
                parts.push(lower_hir(sub, fold));
            }
        }
    }
    run.flush_into(&mut parts);
    TrigramExpr::and(parts)
}

/// Members of a character class when it is small and purely ASCII; `None`
/// widens the class away. Case folding is applied to the members.
fn small_class_bytes(class: &Class, fold: bool) -> Option<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();
    match class {
        Class::Unicode(cls) => {
            for range in cls.ranges() {
                let (start, end) = (range.start(), range.end());
                if !start.is_ascii() || !end.is_ascii() {
                    return None;
                }
                for c in (start as u32)..=(end as u32) {
                    out.push(c as u8);
                    if out.len() > CLASS_EXPANSION_LIMIT {
                        return None;
                    }
                }
            }
        }
        Class::Bytes(cls) => {
            for range in cls.ranges() {
                if range.end() > 0x7F {
                    return None;
                }
                for b in range.start()..=range.end() {
                    out.push(b);
                    if out.len() > CLASS_EXPANSION_LIMIT {
                        return None;
                    }
                }
            }
        }
    }
    if fold {
        for i in 0..out.len() {
            let b = out[i];
            if b.is_ascii_alphabetic() {
                let other = b ^ 0x20;
                if !out.contains(&other) {
                    out.push(other);
                }
            }
        }
        if out.len() > 2 * CLASS_EXPANSION_LIMIT {
            return None;
        }
    }
    out.sort_unstable();
    out.dedup();
    Some(out)
}

/// A run of required byte strings under construction. Starts as the single
/// empty string; literal bytes extend every variant, alternatives multiply
/// them. Overflowing `MAX_VARIANTS` seals the accumulated prefix as a
/// conjunct and restarts, so constraints gathered so far are kept.
struct VariantRun {
    fold: bool,
    variants: Vec<Vec<u8>>,
    sealed_exprs: Vec<TrigramExpr>,
}

impl VariantRun {
    fn new(fold: bool) -> Self {
        Self {
            fold,
            variants: vec![Vec::new()],
            sealed_exprs: Vec::new(),
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.fold && b.is_ascii_alphabetic() {
                self.push_alternatives(&[b.to_ascii_lowercase(), b.to_ascii_uppercase()]);
            } else {
                self.push_alternatives(&[b]);
            }
        }
    }

    fn push_alternatives(&mut self, alts: &[u8]) {
        if self
            .variants
            .len()
            .checked_mul(alts.len())
            .map(|n| n > MAX_VARIANTS)
            .unwrap_or(true)
        {
            let sealed = std::mem::replace(&mut self.variants, vec![Vec::new()]);
            self.sealed_exprs.push(variants_to_expr(sealed));
        }
        let mut next = Vec::with_capacity(self.variants.len() * alts.len());
        for v in &self.variants {
            for &a in alts {
                let mut nv = v.clone();
                nv.push(a);
                next.push(nv);
            }
        }
        self.variants = next;
    }

    fn flush_into(&mut self, parts: &mut Vec<TrigramExpr>) {
        for e in self.sealed_exprs.drain(..) {
            parts.push(e);
        }
        let variants = std::mem::replace(&mut self.variants, vec![Vec::new()]);
        parts.push(variants_to_expr(variants));
    }

    fn into_expr(mut self) -> TrigramExpr {
        let mut parts = Vec::new();
        self.flush_into(&mut parts);
        TrigramExpr::and(parts)
    }
}

/// OR over the variants, each variant an AND of its trigrams. Any variant
/// shorter than three bytes imposes no constraint, widening the whole run.
fn variants_to_expr(variants: Vec<Vec<u8>>) -> TrigramExpr {
    let mut branches = Vec::with_capacity(variants.len());
    for v in variants {
        if v.len() < 3 {
            return TrigramExpr::All;
        }
        let mut tris: Vec<Trigram> = v.windows(3).map(|w| pack(w[0], w[1], w[2])).collect();
        tris.sort_unstable();
        tris.dedup();
        branches.push(TrigramExpr::and(
            tris.into_iter().map(TrigramExpr::Lit).collect(),
        ));
    }
    TrigramExpr::or(branches)
}
