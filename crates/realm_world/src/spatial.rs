//! Uniform grid spatial index over the horizontal plane.
//!
//! Cells partition `x`/`z`; `y` is vertical and only takes part in the exact
//! distance filter. Each indexed guid lives in exactly one cell, tracked by a
//! reverse map so updates and removals never scan.

use std::collections::{HashMap, HashSet};

use realm_protocol::{Guid, Vec3};
use serde::Serialize;

type Cell = (i32, i32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GridStats {
    pub entities: usize,
    pub occupied_cells: usize,
    pub max_cell_occupancy: usize,
}

#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<Cell, HashSet<Guid>>,
    entries: HashMap<Guid, (Vec3, Cell)>,
}

impl SpatialGrid {
    /// `cell_size` should be close to the largest radius queried every tick.
    /// Non-positive sizes are clamped to 1.
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            1.0
        };
        Self {
            cell_size,
            cells: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn cell_of(&self, position: Vec3) -> Cell {
        (
            (position.x / self.cell_size).floor() as i32,
            (position.z / self.cell_size).floor() as i32,
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.entries.contains_key(&guid)
    }

    pub fn position(&self, guid: Guid) -> Option<Vec3> {
        self.entries.get(&guid).map(|(pos, _)| *pos)
    }

    /// Inserts `guid` or moves it to `position`.
    pub fn upsert(&mut self, guid: Guid, position: Vec3) {
        let cell = self.cell_of(position);
        if let Some((old_pos, old_cell)) = self.entries.get_mut(&guid) {
            *old_pos = position;
            if *old_cell == cell {
                return;
            }
            let previous = std::mem::replace(old_cell, cell);
            if let Some(members) = self.cells.get_mut(&previous) {
                members.remove(&guid);
                if members.is_empty() {
                    self.cells.remove(&previous);
                }
            }
        } else {
            self.entries.insert(guid, (position, cell));
        }
        self.cells.entry(cell).or_default().insert(guid);
    }

    pub fn remove(&mut self, guid: Guid) -> Option<Vec3> {
        let (position, cell) = self.entries.remove(&guid)?;
        if let Some(members) = self.cells.get_mut(&cell) {
            members.remove(&guid);
            if members.is_empty() {
                self.cells.remove(&cell);
            }
        }
        Some(position)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.entries.clear();
    }

    /// All guids within `radius` (inclusive, 3D distance) of `center`.
    ///
    /// Negative radii behave as zero; a non-finite centre or radius matches
    /// nothing. The result is sorted for deterministic iteration.
    pub fn query(&self, center: Vec3, radius: f32) -> Vec<Guid> {
        let mut out = Vec::new();
        self.query_into(center, radius, &mut out);
        out.sort_unstable();
        out
    }

    fn query_into(&self, center: Vec3, radius: f32, out: &mut Vec<Guid>) {
        if !center.is_finite() || !radius.is_finite() {
            return;
        }
        let radius = radius.max(0.0);
        let radius_sq = radius * radius;
        let (min_x, min_z) = self.cell_of(Vec3::new(center.x - radius, 0.0, center.z - radius));
        let (max_x, max_z) = self.cell_of(Vec3::new(center.x + radius, 0.0, center.z + radius));
        let window = (max_x as i64 - min_x as i64 + 1) * (max_z as i64 - min_z as i64 + 1);

        let mut visit = |members: &HashSet<Guid>| {
            for guid in members {
                if let Some((pos, _)) = self.entries.get(guid) {
                    if pos.distance_squared(center) <= radius_sq {
                        out.push(*guid);
                    }
                }
            }
        };

        if window > self.cells.len() as i64 {
            // Window larger than the occupied set: walk occupied cells instead.
            for (&(cx, cz), members) in &self.cells {
                if cx >= min_x && cx <= max_x && cz >= min_z && cz <= max_z {
                    visit(members);
                }
            }
        } else {
            for cx in min_x..=max_x {
                for cz in min_z..=max_z {
                    if let Some(members) = self.cells.get(&(cx, cz)) {
                        visit(members);
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> GridStats {
        GridStats {
            entities: self.entries.len(),
            occupied_cells: self.cells.len(),
            max_cell_occupancy: self.cells.values().map(HashSet::len).max().unwrap_or(0),
        }
    }

    /// Verifies the cell map and reverse map agree.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = 0usize;
        for (cell, members) in &self.cells {
            if members.is_empty() {
                return Err(format!("empty cell {cell:?} retained"));
            }
            for guid in members {
                match self.entries.get(guid) {
                    Some((pos, recorded)) if recorded == cell && self.cell_of(*pos) == *cell => {}
                    _ => return Err(format!("{guid} misplaced in cell {cell:?}")),
                }
                seen += 1;
            }
        }
        if seen != self.entries.len() {
            return Err(format!(
                "{} indexed guids but {} cell memberships",
                self.entries.len(),
                seen
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_protocol::EntityKind;

    /// Small deterministic generator so the oracle tests need no extra crates.
    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self, lo: f32, hi: f32) -> f32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let unit = (self.0 >> 40) as f32 / (1u64 << 24) as f32;
            lo + unit * (hi - lo)
        }
    }

    fn brute_force(points: &HashMap<Guid, Vec3>, center: Vec3, radius: f32) -> Vec<Guid> {
        let r = radius.max(0.0);
        let mut out: Vec<Guid> = points
            .iter()
            .filter(|(_, p)| p.distance_squared(center) <= r * r)
            .map(|(g, _)| *g)
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn point_query_contains_self() {
        let mut grid = SpatialGrid::new(10.0);
        let mut rng = Lcg(7);
        for serial in 0..500 {
            let guid = Guid::new(EntityKind::Creature, serial);
            let pos = Vec3::new(
                rng.next_f32(-1000.0, 1000.0),
                rng.next_f32(-50.0, 50.0),
                rng.next_f32(-1000.0, 1000.0),
            );
            grid.upsert(guid, pos);
            assert!(grid.query(pos, 0.0).contains(&guid));
        }
        grid.check_invariants().unwrap();
    }

    #[test]
    fn grid_matches_brute_force_oracle() {
        let mut grid = SpatialGrid::new(16.0);
        let mut points = HashMap::new();
        let mut rng = Lcg(42);
        for serial in 0..2000u64 {
            let guid = Guid::new(EntityKind::Creature, serial);
            let pos = Vec3::new(
                rng.next_f32(-300.0, 300.0),
                rng.next_f32(-20.0, 20.0),
                rng.next_f32(-300.0, 300.0),
            );
            grid.upsert(guid, pos);
            points.insert(guid, pos);
        }
        // Move a third of them, remove a tenth.
        for serial in (0..2000u64).step_by(3) {
            let guid = Guid::new(EntityKind::Creature, serial);
            let pos = Vec3::new(rng.next_f32(-300.0, 300.0), 0.0, rng.next_f32(-300.0, 300.0));
            grid.upsert(guid, pos);
            points.insert(guid, pos);
        }
        for serial in (0..2000u64).step_by(10) {
            let guid = Guid::new(EntityKind::Creature, serial);
            assert!(grid.remove(guid).is_some());
            points.remove(&guid);
        }
        grid.check_invariants().unwrap();
        assert_eq!(grid.len(), points.len());

        for _ in 0..200 {
            let center = Vec3::new(
                rng.next_f32(-350.0, 350.0),
                rng.next_f32(-20.0, 20.0),
                rng.next_f32(-350.0, 350.0),
            );
            let radius = rng.next_f32(-5.0, 120.0);
            assert_eq!(grid.query(center, radius), brute_force(&points, center, radius));
        }
        // A window far larger than the occupied area takes the other branch.
        assert_eq!(
            grid.query(Vec3::ZERO, 1.0e6),
            brute_force(&points, Vec3::ZERO, 1.0e6)
        );
    }

    #[test]
    fn boundary_distance_is_inclusive() {
        let mut grid = SpatialGrid::new(4.0);
        let a = Guid::new(EntityKind::Player, 1);
        grid.upsert(a, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(grid.query(Vec3::ZERO, 5.0), vec![a]);
        assert!(grid.query(Vec3::ZERO, 4.99).is_empty());
    }

    #[test]
    fn vertical_distance_counts() {
        let mut grid = SpatialGrid::new(8.0);
        let a = Guid::new(EntityKind::Player, 1);
        grid.upsert(a, Vec3::new(0.0, 30.0, 0.0));
        assert!(grid.query(Vec3::ZERO, 10.0).is_empty());
        assert_eq!(grid.query(Vec3::ZERO, 30.0), vec![a]);
    }

    #[test]
    fn moving_across_cells_releases_old_cell() {
        let mut grid = SpatialGrid::new(10.0);
        let a = Guid::new(EntityKind::Creature, 1);
        grid.upsert(a, Vec3::new(1.0, 0.0, 1.0));
        grid.upsert(a, Vec3::new(55.0, 0.0, -12.0));
        assert_eq!(grid.stats().occupied_cells, 1);
        assert!(grid.query(Vec3::new(1.0, 0.0, 1.0), 2.0).is_empty());
        grid.check_invariants().unwrap();
        assert_eq!(grid.remove(a), Some(Vec3::new(55.0, 0.0, -12.0)));
        assert!(grid.is_empty());
        assert_eq!(grid.stats(), GridStats::default());
    }

    #[test]
    fn non_finite_queries_match_nothing() {
        let mut grid = SpatialGrid::new(10.0);
        grid.upsert(Guid::new(EntityKind::Object, 1), Vec3::ZERO);
        assert!(grid.query(Vec3::new(f32::NAN, 0.0, 0.0), 5.0).is_empty());
        assert!(grid.query(Vec3::ZERO, f32::INFINITY).is_empty());
    }
}
