//! Frame table of contents: section sizes, the optional permutation, and
//! the order in which sections become decodable.

use hematite_bitstream::{Bits, Bitstream, Bundle};

use crate::{FrameHeader, Result};

/// What a TOC section contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// The whole frame in one implicit section.
    All,
    LfGlobal,
    LfGroup(u32),
    HfGlobal,
    GroupPass { pass_idx: u32, group_idx: u32 },
}

/// One TOC entry resolved to a codestream location.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub kind: SectionKind,
    /// Byte offset from the end of the TOC.
    pub offset: u64,
    pub size: u32,
}

#[derive(Debug)]
pub struct Toc {
    sections: Vec<Section>,
    /// Indices into `sections` in decode order.
    decode_plan: Vec<usize>,
    total_size: u64,
}

impl Bundle<&FrameHeader> for Toc {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, header: &FrameHeader) -> Result<Self> {
        let num_groups = header.num_groups();
        let num_lf_groups = header.num_lf_groups();
        let num_passes = header.passes.num_passes;

        let kinds: Vec<SectionKind> = if num_groups == 1 && num_passes == 1 {
            vec![SectionKind::All]
        } else {
            let mut kinds = Vec::with_capacity((2 + num_lf_groups + num_groups * num_passes) as usize);
            kinds.push(SectionKind::LfGlobal);
            kinds.extend((0..num_lf_groups).map(SectionKind::LfGroup));
            kinds.push(SectionKind::HfGlobal);
            for pass_idx in 0..num_passes {
                kinds.extend((0..num_groups).map(|group_idx| SectionKind::GroupPass {
                    pass_idx,
                    group_idx,
                }));
            }
            kinds
        };
        let entry_count = kinds.len() as u32;

        let permutation = if bitstream.read_bool()? {
            let mut decoder = hematite_coding::Decoder::parse(bitstream, 8)?;
            decoder.begin(bitstream)?;
            let permutation =
                hematite_coding::read_permutation(bitstream, &mut decoder, entry_count, 0)?;
            decoder.finalize()?;
            Some(permutation)
        } else {
            None
        };

        bitstream.zero_pad_to_byte()?;
        let sizes = (0..entry_count)
            .map(|_| {
                bitstream.read_u32(Bits(10), 1024 + Bits(14), 17408 + Bits(22), 4211712 + Bits(30))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bitstream.zero_pad_to_byte()?;

        let mut offsets = Vec::with_capacity(sizes.len());
        let mut acc = 0u64;
        for &size in &sizes {
            offsets.push(acc);
            acc += size as u64;
        }

        let sections: Vec<Section> = if let Some(permutation) = &permutation {
            if permutation.len() != kinds.len() {
                return Err(crate::Error::InvalidTocPermutation);
            }
            kinds
                .iter()
                .zip(permutation)
                .map(|(&kind, &physical)| Section {
                    kind,
                    offset: offsets[physical],
                    size: sizes[physical],
                })
                .collect()
        } else {
            kinds
                .iter()
                .zip(offsets.iter().zip(&sizes))
                .map(|(&kind, (&offset, &size))| Section {
                    kind,
                    offset,
                    size,
                })
                .collect()
        };

        let decode_plan = build_decode_plan(&sections, header);

        Ok(Self {
            sections,
            decode_plan,
            total_size: acc,
        })
    }
}

impl Toc {
    #[inline]
    pub fn is_single_section(&self) -> bool {
        matches!(self.sections[..], [Section { kind: SectionKind::All, .. }])
    }

    /// Total byte size of all sections.
    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[inline]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Sections in decode order: ascending codestream offset, except that
    /// group sections that physically precede their covering LF group are
    /// pulled back to just after it.
    pub fn decode_order(&self) -> impl Iterator<Item = &Section> {
        self.decode_plan.iter().map(|&idx| &self.sections[idx])
    }
}

fn build_decode_plan(sections: &[Section], header: &FrameHeader) -> Vec<usize> {
    let mut plan: Vec<usize> = (0..sections.len()).collect();
    plan.sort_by_key(|&idx| (sections[idx].offset, idx));

    // LfGlobal gates everything else, and a group section can only be
    // decoded once HfGlobal and its LF group's metadata are known.
    // Relocate offenders to directly follow their dependencies, keeping
    // raster order among the relocated sections.
    let mut lf_global_seen = false;
    let mut hf_global_seen = false;
    let mut lf_group_seen = vec![false; header.num_lf_groups() as usize];
    let mut waiting: Vec<usize> = Vec::new();
    let mut result = Vec::with_capacity(plan.len());

    let is_ready = |idx: usize,
                    lf_global_seen: bool,
                    hf_global_seen: bool,
                    lf_group_seen: &[bool]|
     -> bool {
        match sections[idx].kind {
            SectionKind::All | SectionKind::LfGlobal => true,
            SectionKind::LfGroup(_) | SectionKind::HfGlobal => lf_global_seen,
            SectionKind::GroupPass { group_idx, .. } => {
                let lf_group_idx = header.lf_group_idx_from_group_idx(group_idx) as usize;
                lf_global_seen && hf_global_seen && lf_group_seen[lf_group_idx]
            }
        }
    };

    for &idx in &plan {
        if !is_ready(idx, lf_global_seen, hf_global_seen, &lf_group_seen) {
            waiting.push(idx);
            continue;
        }
        result.push(idx);

        // Newly satisfied dependencies release waiting sections in order.
        loop {
            match sections[result[result.len() - 1]].kind {
                SectionKind::LfGlobal => lf_global_seen = true,
                SectionKind::HfGlobal => hf_global_seen = true,
                SectionKind::LfGroup(lf_group_idx) => {
                    lf_group_seen[lf_group_idx as usize] = true;
                }
                _ => {}
            }
            let ready_pos = waiting
                .iter()
                .position(|&idx| is_ready(idx, lf_global_seen, hf_global_seen, &lf_group_seen));
            match ready_pos {
                Some(pos) => result.push(waiting.remove(pos)),
                None => break,
            }
        }
    }
    // Anything still waiting belongs to a broken layout; keep it at the end
    // so section decoding fails cleanly.
    result.extend(waiting);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> FrameHeader {
        // 1024x256 modular frame with group_size_shift 1: four 256px groups
        // in one 2048px LF group.
        FrameHeader {
            frame_type: crate::header::FrameType::Regular,
            encoding: crate::header::Encoding::Modular,
            flags: Default::default(),
            do_ycbcr: false,
            jpeg_upsampling: [0; 3],
            upsampling: 1,
            ec_upsampling: Vec::new(),
            group_size_shift: 1,
            x_qm_scale: 2,
            b_qm_scale: 2,
            passes: Default::default(),
            lf_level: 0,
            have_crop: false,
            x0: 0,
            y0: 0,
            width: 1024,
            height: 256,
            blending_info: crate::header::BlendingInfo {
                mode: crate::header::BlendMode::Replace,
                alpha_channel: 0,
                clamp: false,
                source: 0,
            },
            ec_blending_info: Vec::new(),
            duration: 0,
            timecode: 0,
            is_last: true,
            save_as_reference: 0,
            resets_canvas: true,
            save_before_ct: false,
            name: Default::default(),
            restoration_filter: Default::default(),
            encoded_color_channels: 3,
        }
    }

    #[test]
    fn decode_plan_pulls_groups_after_their_lf_group() {
        let header = test_header();
        assert_eq!(header.num_groups(), 4);
        assert_eq!(header.num_lf_groups(), 1);

        // Physical layout: two group sections come before the LF group.
        let kinds = [
            SectionKind::LfGlobal,
            SectionKind::GroupPass {
                pass_idx: 0,
                group_idx: 0,
            },
            SectionKind::GroupPass {
                pass_idx: 0,
                group_idx: 1,
            },
            SectionKind::LfGroup(0),
            SectionKind::HfGlobal,
            SectionKind::GroupPass {
                pass_idx: 0,
                group_idx: 2,
            },
            SectionKind::GroupPass {
                pass_idx: 0,
                group_idx: 3,
            },
        ];
        let sections: Vec<Section> = kinds
            .iter()
            .enumerate()
            .map(|(idx, &kind)| Section {
                kind,
                offset: idx as u64 * 100,
                size: 100,
            })
            .collect();

        let plan = build_decode_plan(&sections, &header);
        let kinds_in_order: Vec<SectionKind> =
            plan.into_iter().map(|idx| sections[idx].kind).collect();
        // The two early group sections wait for both their LF group and
        // HfGlobal, then re-emerge in raster order.
        assert_eq!(
            kinds_in_order,
            [
                SectionKind::LfGlobal,
                SectionKind::LfGroup(0),
                SectionKind::HfGlobal,
                SectionKind::GroupPass {
                    pass_idx: 0,
                    group_idx: 0
                },
                SectionKind::GroupPass {
                    pass_idx: 0,
                    group_idx: 1
                },
                SectionKind::GroupPass {
                    pass_idx: 0,
                    group_idx: 2
                },
                SectionKind::GroupPass {
                    pass_idx: 0,
                    group_idx: 3
                },
            ]
        );
    }
}
