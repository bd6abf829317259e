//! Per-venue token adjacency graphs and cycle enumeration.

use std::collections::{BTreeMap, HashMap};

use ethers::types::Address;

use arb_types::{PoolInfo, Token, VenueId};

/// Token adjacency graph over one venue's two-token pools.
pub struct TokenGraph {
    venue: VenueId,
    /// token -> [(neighbor, index into pools)]
    adjacency: HashMap<Address, Vec<(Token, usize)>>,
    tokens: HashMap<Address, Token>,
    pools: Vec<PoolInfo>,
}

impl TokenGraph {
    /// Build the adjacency graph from every two-token pool on `venue`.
    pub fn build(pools: &[PoolInfo], venue: &VenueId) -> Self {
        let mut adjacency: HashMap<Address, Vec<(Token, usize)>> = HashMap::new();
        let mut tokens = HashMap::new();
        let mut kept = Vec::new();

        for pool in pools {
            if &pool.venue != venue || pool.tokens.len() != 2 || !pool.kind.has_liquidity() {
                continue;
            }
            let idx = kept.len();
            kept.push(pool.clone());
            let (a, b) = (&pool.tokens[0], &pool.tokens[1]);
            tokens.insert(a.address, a.clone());
            tokens.insert(b.address, b.clone());
            adjacency
                .entry(a.address)
                .or_default()
                .push((b.clone(), idx));
            adjacency
                .entry(b.address)
                .or_default()
                .push((a.clone(), idx));
        }

        Self {
            venue: venue.clone(),
            adjacency,
            tokens,
            pools: kept,
        }
    }

    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    pub fn pool(&self, idx: usize) -> Option<&PoolInfo> {
        self.pools.get(idx)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn neighbors(&self, token: &Token) -> &[(Token, usize)] {
        self.adjacency
            .get(&token.address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The `n` tokens with the highest degree, ties broken by address for
    /// determinism.
    pub fn top_tokens_by_degree(&self, n: usize) -> Vec<Token> {
        // BTreeMap keys give the deterministic address order within a degree.
        let mut by_degree: BTreeMap<Address, usize> = BTreeMap::new();
        for (address, edges) in &self.adjacency {
            by_degree.insert(*address, edges.len());
        }
        let mut ranked: Vec<(Address, usize)> = by_degree.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(n)
            .filter_map(|(addr, _)| self.tokens.get(&addr).cloned())
            .collect()
    }

    /// Enumerate all length-3 cycles `base -> t1 -> t2 -> base` by DFS,
    /// using three distinct pools. Returns pool index triples.
    pub fn three_leg_cycles(&self, base: &Token) -> Vec<[usize; 3]> {
        let mut cycles = Vec::new();

        for (t1, p1) in self.neighbors(base) {
            if t1 == base {
                continue;
            }
            for (t2, p2) in self.neighbors(t1) {
                if t2 == base || t2 == t1 || p2 == p1 {
                    continue;
                }
                for (t3, p3) in self.neighbors(t2) {
                    if t3 != base || p3 == p1 || p3 == p2 {
                        continue;
                    }
                    cycles.push([*p1, *p2, *p3]);
                }
            }
        }

        cycles
    }
}
