//! The nine compute stages, their binding tables and dispatch shapes.

use std::fmt;

use tilefill_types::Config;

use crate::buffers::BufferKind;
use crate::device::BindingType;
use crate::error::Error;
use crate::{MAX_WORKGROUPS_PER_DIM, SEGMENTS_PER_LINE, WG_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    PathtagReduce,
    PathtagScan,
    DrawReduce,
    DrawLeaf,
    PathCount,
    Backdrop,
    Coarse,
    PathTiling,
    Fine,
}

/// One buffer binding of a stage. Binding numbers are the position in
/// [`Stage::bindings`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub buffer: BufferKind,
    pub ty: BindingType,
}

const fn uniform(buffer: BufferKind) -> Binding {
    Binding {
        buffer,
        ty: BindingType::Uniform,
    }
}

const fn ro(buffer: BufferKind) -> Binding {
    Binding {
        buffer,
        ty: BindingType::Storage { read_only: true },
    }
}

const fn rw(buffer: BufferKind) -> Binding {
    Binding {
        buffer,
        ty: BindingType::Storage { read_only: false },
    }
}

mod bindings {
    use super::{ro, rw, uniform, Binding};
    use crate::buffers::BufferKind::*;

    pub const PATHTAG_REDUCE: &[Binding] = &[uniform(Config), ro(Scene), rw(Reduced)];
    pub const PATHTAG_SCAN: &[Binding] =
        &[uniform(Config), ro(Scene), ro(Reduced), rw(TagMonoids)];
    pub const DRAW_REDUCE: &[Binding] = &[uniform(Config), ro(Scene), rw(DrawReduced)];
    pub const DRAW_LEAF: &[Binding] = &[
        uniform(Config),
        ro(Scene),
        ro(DrawReduced),
        rw(DrawMonoids),
        rw(Info),
    ];
    pub const PATH_COUNT: &[Binding] = &[
        uniform(Config),
        rw(Bump),
        ro(Lines),
        ro(Paths),
        rw(Tiles),
        rw(SegCounts),
    ];
    pub const BACKDROP: &[Binding] = &[uniform(Config), ro(Paths), rw(Tiles)];
    pub const COARSE: &[Binding] = &[
        uniform(Config),
        ro(Scene),
        ro(DrawMonoids),
        ro(Paths),
        rw(Tiles),
        rw(Bump),
        rw(Ptcl),
        rw(TilePtclOffsets),
    ];
    pub const PATH_TILING: &[Binding] = &[
        uniform(Config),
        rw(Bump),
        ro(SegCounts),
        ro(Lines),
        ro(Paths),
        ro(Tiles),
        rw(Segments),
    ];
    pub const FINE: &[Binding] = &[
        uniform(Config),
        ro(Ptcl),
        ro(Segments),
        ro(Info),
        rw(Output),
    ];
}

/// How a stage's element count becomes a workgroup grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchRule {
    /// `ceil(count / WG_SIZE)` workgroups along x.
    PerElement,
    /// One workgroup per path, spilling into y past the per-dimension limit.
    PerPath,
    /// One workgroup per output tile.
    PerTile,
}

impl Stage {
    /// Every stage in submission order.
    pub const ALL: [Stage; 9] = [
        Stage::PathtagReduce,
        Stage::PathtagScan,
        Stage::DrawReduce,
        Stage::DrawLeaf,
        Stage::PathCount,
        Stage::Backdrop,
        Stage::Coarse,
        Stage::PathTiling,
        Stage::Fine,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::PathtagReduce => "pathtag_reduce",
            Stage::PathtagScan => "pathtag_scan",
            Stage::DrawReduce => "draw_reduce",
            Stage::DrawLeaf => "draw_leaf",
            Stage::PathCount => "path_count",
            Stage::Backdrop => "backdrop",
            Stage::Coarse => "coarse",
            Stage::PathTiling => "path_tiling",
            Stage::Fine => "fine",
        }
    }

    /// Position in [`Stage::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bindings(self) -> &'static [Binding] {
        match self {
            Stage::PathtagReduce => bindings::PATHTAG_REDUCE,
            Stage::PathtagScan => bindings::PATHTAG_SCAN,
            Stage::DrawReduce => bindings::DRAW_REDUCE,
            Stage::DrawLeaf => bindings::DRAW_LEAF,
            Stage::PathCount => bindings::PATH_COUNT,
            Stage::Backdrop => bindings::BACKDROP,
            Stage::Coarse => bindings::COARSE,
            Stage::PathTiling => bindings::PATH_TILING,
            Stage::Fine => bindings::FINE,
        }
    }

    pub fn dispatch_rule(self) -> DispatchRule {
        match self {
            Stage::Backdrop => DispatchRule::PerPath,
            Stage::Fine => DispatchRule::PerTile,
            _ => DispatchRule::PerElement,
        }
    }

    /// The number of elements this stage processes for a frame.
    pub fn element_count(self, config: &Config) -> u32 {
        match self {
            Stage::PathtagReduce | Stage::PathtagScan => config.n_path_tag_words(),
            Stage::DrawReduce | Stage::DrawLeaf => config.n_drawobj,
            Stage::PathCount => config.n_lines,
            Stage::Backdrop => config.n_path,
            Stage::Coarse => {
                if config.n_drawobj > 0 {
                    config.n_tiles()
                } else {
                    0
                }
            }
            Stage::PathTiling => config.n_lines.saturating_mul(SEGMENTS_PER_LINE),
            Stage::Fine => config.n_tiles(),
        }
    }

    /// Workgroup grid for this frame, or `None` if the stage has nothing to
    /// do and is skipped.
    pub fn workgroups(self, config: &Config) -> Option<[u32; 3]> {
        let count = self.element_count(config);
        let shape = match self.dispatch_rule() {
            DispatchRule::PerElement => [workgroup_count(count, WG_SIZE), 1, 1],
            DispatchRule::PerPath => spill(count),
            DispatchRule::PerTile if count == 0 => [0, 0, 0],
            DispatchRule::PerTile => [config.width_in_tiles, config.height_in_tiles, 1],
        };
        if shape.contains(&0) {
            None
        } else {
            Some(shape)
        }
    }

    /// [`Stage::workgroups`], rejecting grids the device can't dispatch.
    ///
    /// Only per-path dispatches spill into y; the other stages index by
    /// `global_id.x` alone.
    pub fn checked_workgroups(self, config: &Config) -> Result<Option<[u32; 3]>, Error> {
        match self.workgroups(config) {
            Some(workgroups) if workgroups.iter().any(|&n| n > MAX_WORKGROUPS_PER_DIM) => {
                Err(Error::TooManyWorkgroups {
                    stage: self,
                    workgroups,
                })
            }
            shape => Ok(shape),
        }
    }

    pub(crate) fn default_source(self) -> &'static str {
        match self {
            Stage::PathtagReduce => include_str!("../shader/pathtag_reduce.wgsl"),
            Stage::PathtagScan => include_str!("../shader/pathtag_scan.wgsl"),
            Stage::DrawReduce => include_str!("../shader/draw_reduce.wgsl"),
            Stage::DrawLeaf => include_str!("../shader/draw_leaf.wgsl"),
            Stage::PathCount => include_str!("../shader/path_count.wgsl"),
            Stage::Backdrop => include_str!("../shader/backdrop.wgsl"),
            Stage::Coarse => include_str!("../shader/coarse.wgsl"),
            Stage::PathTiling => include_str!("../shader/path_tiling.wgsl"),
            Stage::Fine => include_str!("../shader/fine.wgsl"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `ceil(n / wg)`, zero only when `n` is.
pub fn workgroup_count(n: u32, wg: u32) -> u32 {
    n.div_ceil(wg)
}

fn spill(count: u32) -> [u32; 3] {
    if count <= MAX_WORKGROUPS_PER_DIM {
        [count, 1, 1]
    } else {
        [
            MAX_WORKGROUPS_PER_DIM,
            count.div_ceil(MAX_WORKGROUPS_PER_DIM),
            1,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n_lines: u32, n_path: u32, n_drawobj: u32) -> Config {
        Config {
            width_in_tiles: 4,
            height_in_tiles: 3,
            target_width: 64,
            target_height: 48,
            n_drawobj,
            n_path,
            n_lines,
            path_tag_base: 0,
            draw_tag_base: 2,
            ..Default::default()
        }
    }

    #[test]
    fn workgroup_count_is_ceiling_division() {
        for wg in [1, 7, 64, 256] {
            for n in 0..1000 {
                let count = workgroup_count(n, wg);
                assert_eq!(count, (n + wg - 1) / wg);
                assert_eq!(count == 0, n == 0);
                assert!(count * wg >= n);
            }
        }
        assert_eq!(workgroup_count(u32::MAX, 256), 16_777_216);
    }

    #[test]
    fn bindings_start_with_the_uniform_config() {
        for stage in Stage::ALL {
            let bindings = stage.bindings();
            assert_eq!(bindings[0], uniform(BufferKind::Config));
            assert!((3..=8).contains(&bindings.len()), "{stage}");
            assert!(bindings[1..]
                .iter()
                .all(|b| matches!(b.ty, BindingType::Storage { .. })));
        }
    }

    #[test]
    fn binding_tables_are_static() {
        let tables: Vec<&'static [Binding]> = Stage::ALL.iter().map(|s| s.bindings()).collect();
        let total: usize = tables.iter().map(|t| t.len()).sum();
        assert_eq!(total, 44);
        assert_eq!(tables[Stage::Fine.index()].last(), Some(&rw(BufferKind::Output)));
    }

    #[test]
    fn stages_are_listed_in_order() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
        assert_eq!(Stage::Coarse.bindings().len(), 8);
        assert_eq!(Stage::Backdrop.bindings()[2], rw(BufferKind::Tiles));
    }

    #[test]
    fn empty_stages_are_skipped() {
        let c = config(0, 0, 0);
        // The transform tag alone still produces path tag words.
        assert!(Stage::PathtagReduce.workgroups(&c).is_some());
        assert_eq!(Stage::DrawReduce.workgroups(&c), None);
        assert_eq!(Stage::PathCount.workgroups(&c), None);
        assert_eq!(Stage::Backdrop.workgroups(&c), None);
        assert_eq!(Stage::Coarse.workgroups(&c), None);
        assert_eq!(Stage::PathTiling.workgroups(&c), None);
        assert_eq!(Stage::Fine.workgroups(&c), Some([4, 3, 1]));
    }

    #[test]
    fn shapes_follow_their_rules() {
        let c = config(300, 2, 2);
        assert_eq!(Stage::PathCount.workgroups(&c), Some([2, 1, 1]));
        assert_eq!(Stage::PathTiling.workgroups(&c), Some([5, 1, 1]));
        assert_eq!(Stage::Backdrop.workgroups(&c), Some([2, 1, 1]));
        assert_eq!(Stage::Coarse.workgroups(&c), Some([1, 1, 1]));
        assert_eq!(Stage::Fine.workgroups(&c), Some([4, 3, 1]));
    }

    #[test]
    fn per_path_spills_into_y() {
        let c = config(1, MAX_WORKGROUPS_PER_DIM + 1, 1);
        assert_eq!(
            Stage::Backdrop.workgroups(&c),
            Some([MAX_WORKGROUPS_PER_DIM, 2, 1])
        );
        let c = config(1, MAX_WORKGROUPS_PER_DIM, 1);
        assert_eq!(
            Stage::Backdrop.workgroups(&c),
            Some([MAX_WORKGROUPS_PER_DIM, 1, 1])
        );
    }

    #[test]
    fn per_element_grids_stop_at_the_dimension_limit() {
        // 4 slots per line, 256 slots per workgroup: 64 lines per workgroup.
        let at_limit = config(MAX_WORKGROUPS_PER_DIM * 64, 1, 1);
        assert_eq!(
            Stage::PathTiling.checked_workgroups(&at_limit).unwrap(),
            Some([MAX_WORKGROUPS_PER_DIM, 1, 1])
        );

        let past_limit = config(4_200_000, 1, 1);
        assert_eq!(Stage::PathTiling.workgroups(&past_limit), Some([65625, 1, 1]));
        let err = Stage::PathTiling.checked_workgroups(&past_limit).unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyWorkgroups {
                stage: Stage::PathTiling,
                workgroups: [65625, 1, 1],
            }
        ));
        // 4.2M lines is still in range for the one-thread-per-line stage.
        assert_eq!(
            Stage::PathCount.checked_workgroups(&past_limit).unwrap(),
            Some([16407, 1, 1])
        );
        assert_eq!(Stage::Backdrop.checked_workgroups(&past_limit).unwrap(), Some([1, 1, 1]));
        assert_eq!(Stage::DrawReduce.checked_workgroups(&config(0, 0, 0)).unwrap(), None);
    }

    #[test]
    fn fine_is_skipped_without_a_target() {
        let mut c = config(1, 1, 1);
        c.width_in_tiles = 0;
        assert_eq!(Stage::Fine.workgroups(&c), None);
    }
}
