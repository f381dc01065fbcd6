//! Meta-adaptive tree: a decision tree selecting the entropy context and
//! predictor for every sample.

use std::sync::Arc;

use hematite_bitstream::{unpack_signed, Bitstream};
use hematite_coding::Decoder;

use crate::predictor::Predictor;
use crate::{Error, Result};

const MAX_TREE_DEPTH: u32 = 64;

/// MA tree nodes in a flat arena.
///
/// Children are stored after their parent; nodes are read in level order, so
/// leaves are numbered contiguously in read order and define the context
/// space of the associated entropy decoder.
#[derive(Debug)]
enum MaTreeNode {
    Branch {
        property: u32,
        value: i32,
        left: u32,
        right: u32,
    },
    Leaf(MaTreeLeaf),
}

/// Decoded leaf: entropy context plus the sample reconstruction parameters.
#[derive(Debug, Clone)]
pub struct MaTreeLeaf {
    pub ctx: u32,
    pub predictor: Predictor,
    pub offset: i32,
    pub multiplier: u32,
}

/// A parsed MA tree together with the entropy decoder its leaves refer to.
#[derive(Debug, Clone)]
pub struct MaConfig {
    nodes: Arc<Vec<MaTreeNode>>,
    num_leaves: u32,
    max_property: u32,
    decoder: Decoder,
}

impl MaConfig {
    /// Reads an MA tree and its distribution bundle.
    ///
    /// `node_limit` is the profile bound on the node count, derived from the
    /// total sample count of the channels the tree will decode.
    pub fn parse(bitstream: &mut Bitstream, node_limit: usize) -> Result<Self> {
        let mut tree_decoder = Decoder::parse(bitstream, 6)?;
        if always_reads_branch(&tree_decoder) {
            tracing::error!("MA tree never terminates");
            return Err(Error::InvalidMaTree);
        }

        tree_decoder.begin(bitstream)?;

        let mut nodes = Vec::new();
        let mut depths = vec![1u32; 1];
        let mut allocated = 1usize;
        let mut num_leaves = 0u32;
        let mut max_property = 0u32;
        while nodes.len() < allocated {
            if allocated > node_limit {
                tracing::error!(node_limit, "MA tree too large");
                return Err(Error::InvalidMaTree);
            }
            let depth = depths[nodes.len()];
            if depth > MAX_TREE_DEPTH {
                return Err(Error::InvalidMaTree);
            }

            let property = tree_decoder.read_varint(bitstream, 1)?;
            let node = if let Some(property) = property.checked_sub(1) {
                let value = unpack_signed(tree_decoder.read_varint(bitstream, 0)?);
                let left = allocated as u32;
                let right = allocated as u32 + 1;
                allocated += 2;
                depths.resize(allocated, depth + 1);
                max_property = max_property.max(property);
                MaTreeNode::Branch {
                    property,
                    value,
                    left,
                    right,
                }
            } else {
                let predictor = Predictor::try_from(tree_decoder.read_varint(bitstream, 2)?)?;
                let offset = unpack_signed(tree_decoder.read_varint(bitstream, 3)?);
                let mul_log = tree_decoder.read_varint(bitstream, 4)?;
                if mul_log >= 31 {
                    return Err(Error::InvalidMaTree);
                }
                let mul_bits = tree_decoder.read_varint(bitstream, 5)?;
                if mul_bits > (1u32 << (31 - mul_log)) - 2 {
                    return Err(Error::InvalidMaTree);
                }
                let leaf = MaTreeLeaf {
                    ctx: num_leaves,
                    predictor,
                    offset,
                    multiplier: (mul_bits + 1) << mul_log,
                };
                num_leaves += 1;
                MaTreeNode::Leaf(leaf)
            };
            nodes.push(node);
        }
        tree_decoder.finalize()?;

        let decoder = Decoder::parse(bitstream, num_leaves)?;
        Ok(Self {
            nodes: Arc::new(nodes),
            num_leaves,
            max_property,
            decoder,
        })
    }

    /// Returns a fresh clone of the leaf-context entropy decoder.
    #[inline]
    pub fn decoder(&self) -> Decoder {
        self.decoder.clone()
    }

    #[inline]
    pub fn num_leaves(&self) -> u32 {
        self.num_leaves
    }

    /// Returns whether decoding needs the self-correcting predictor state,
    /// either for property 15 or for a leaf predictor.
    pub fn needs_self_correcting(&self) -> bool {
        self.nodes.iter().any(|node| match node {
            MaTreeNode::Branch { property, .. } => *property == 15,
            MaTreeNode::Leaf(leaf) => leaf.predictor == Predictor::SelfCorrecting,
        })
    }

    /// Returns whether any property references earlier channels.
    pub fn needs_prev_channels(&self) -> bool {
        self.max_property >= 16
    }

    /// Walks the tree with the given property accessor and returns the leaf.
    #[inline]
    pub fn leaf(&self, mut property: impl FnMut(u32) -> i32) -> &MaTreeLeaf {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                MaTreeNode::Branch {
                    property: p,
                    value,
                    left,
                    right,
                } => {
                    idx = if property(*p) > *value {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                MaTreeNode::Leaf(leaf) => return leaf,
            }
        }
    }

    /// Returns the single leaf if the tree has no decision nodes.
    pub fn single_leaf(&self) -> Option<&MaTreeLeaf> {
        match &self.nodes[..] {
            [MaTreeNode::Leaf(leaf)] => Some(leaf),
            _ => None,
        }
    }
}

/// Distribution 1 decides between decision and leaf nodes; if it can only
/// ever read a nonzero token, the tree grows forever.
fn always_reads_branch(decoder: &Decoder) -> bool {
    let cluster = decoder.cluster_map()[1];
    matches!(decoder.single_token(cluster), Some(token) if token != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(property: u32, value: i32, left: u32, right: u32) -> MaTreeNode {
        MaTreeNode::Branch {
            property,
            value,
            left,
            right,
        }
    }

    fn leaf(ctx: u32) -> MaTreeNode {
        MaTreeNode::Leaf(MaTreeLeaf {
            ctx,
            predictor: Predictor::Zero,
            offset: 0,
            multiplier: 1,
        })
    }

    #[test]
    fn walk_follows_threshold() {
        // Split on property 0 at value 3: larger goes left.
        let config = MaConfig {
            nodes: Arc::new(vec![branch(0, 3, 1, 2), leaf(0), leaf(1)]),
            num_leaves: 2,
            max_property: 0,
            decoder: dummy_decoder(),
        };
        assert_eq!(config.leaf(|_| 5).ctx, 0);
        assert_eq!(config.leaf(|_| 3).ctx, 1);
        assert_eq!(config.leaf(|_| -1).ctx, 1);
    }

    fn dummy_decoder() -> Decoder {
        // Smallest valid distribution bundle: one context, prefix-coded,
        // single-symbol alphabet.
        // Bits, LSB first: lz77_enabled = 0, use_prefix_code = 1,
        // split_exponent = 0 (4 bits), alphabet size present = 0.
        let bytes = [0x02u8, 0];
        let mut bitstream = hematite_bitstream::Bitstream::new(&bytes);
        Decoder::parse(&mut bitstream, 1).unwrap()
    }
}
