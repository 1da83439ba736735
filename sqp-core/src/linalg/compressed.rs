//! Compressed sparse storage with a stable triplet permutation.
//!
//! QP engines want compressed (row- or column-) storage while the oracle
//! re-evaluates values in triplet order. The bridge is a permutation table
//! built once from a stable sort of the structure: slot `s` of the backing
//! triplet (including mirror entries of a symmetric expansion and the
//! injected identity blocks) lands at compressed position `perm[s]`, so fresh
//! values are re-applied without resorting.
//!
//! The identity injection realizes the slack columns of the SL1QP subproblem:
//! two s-by-s identity blocks with signs +1 and -1 appended after the source
//! entries. Their values are written exactly once; later value refreshes only
//! touch source slots.

use sprs::CsMat;

use super::triplet::TripletMat;

/// Compressed storage layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOrder {
    /// Row-compressed (CSR).
    RowMajor,
    /// Column-compressed (CSC).
    ColumnMajor,
}

/// Descriptor for two identity blocks appended to a Jacobian-like matrix.
///
/// Block 1 carries +1 entries starting at (`irow1`, `jcol1`); block 2 carries
/// -1 entries starting at (`irow2`, `jcol2`). Both are `size` x `size`.
#[derive(Debug, Clone, Copy)]
pub struct IdentityInjection {
    pub size: usize,
    pub irow1: usize,
    pub jcol1: usize,
    pub irow2: usize,
    pub jcol2: usize,
}

/// Sparse matrix in compressed form with a stable permutation back to its
/// source triplet.
#[derive(Debug, Clone)]
pub struct CompressedMat {
    inner: CsMat<f64>,
    /// perm[slot] = position of backing slot `slot` in the compressed arrays.
    perm: Vec<usize>,
    /// Slots fed from the source triplet (incl. symmetric mirror slots).
    source_slots: usize,
    symmetric_expand: bool,
    injection: Option<IdentityInjection>,
    /// Latched once the +/-1 identity values have been written.
    initialised: bool,
}

impl CompressedMat {
    /// Build the compressed structure from a triplet matrix, sized
    /// (`nrows`, `ncols`), optionally expanding a symmetric-upper source to
    /// full storage and appending two identity blocks.
    ///
    /// Values are all zero until [`refresh_values`](Self::refresh_values) is
    /// called.
    pub fn from_triplet(
        source: &TripletMat,
        nrows: usize,
        ncols: usize,
        order: StorageOrder,
        symmetric_expand: bool,
        injection: Option<IdentityInjection>,
    ) -> Self {
        assert!(source.nrows() <= nrows);
        assert!(source.ncols() <= ncols);
        if symmetric_expand {
            assert!(
                source.is_symmetric_upper(),
                "expansion requires a symmetric-upper source"
            );
        }

        // Enumerate backing slots: source entries (with mirror slots directly
        // after their upper-triangle original), then the identity tail.
        let mut entries: Vec<(usize, usize, usize)> = Vec::new();
        let mut slot = 0;
        for k in 0..source.nnz() {
            let (i, j) = (source.row_indices()[k], source.col_indices()[k]);
            entries.push((i, j, slot));
            slot += 1;
            if symmetric_expand && i != j {
                entries.push((j, i, slot));
                slot += 1;
            }
        }
        let source_slots = slot;
        if let Some(inj) = injection {
            for d in 0..inj.size {
                entries.push((inj.irow1 + d, inj.jcol1 + d, slot));
                slot += 1;
            }
            for d in 0..inj.size {
                entries.push((inj.irow2 + d, inj.jcol2 + d, slot));
                slot += 1;
            }
        }
        let nnz = slot;

        // Stable sort by (outer, inner); ties cannot occur for distinct
        // positions, duplicates are a caller error.
        match order {
            StorageOrder::RowMajor => entries.sort_by_key(|&(i, j, _)| (i, j)),
            StorageOrder::ColumnMajor => entries.sort_by_key(|&(i, j, _)| (j, i)),
        }

        let outer_dim = match order {
            StorageOrder::RowMajor => nrows,
            StorageOrder::ColumnMajor => ncols,
        };
        let mut indptr = vec![0usize; outer_dim + 1];
        let mut indices = vec![0usize; nnz];
        let mut perm = vec![0usize; nnz];
        for (pos, &(i, j, s)) in entries.iter().enumerate() {
            let (outer, inner) = match order {
                StorageOrder::RowMajor => (i, j),
                StorageOrder::ColumnMajor => (j, i),
            };
            indptr[outer + 1] += 1;
            indices[pos] = inner;
            perm[s] = pos;
        }
        for o in 0..outer_dim {
            indptr[o + 1] += indptr[o];
        }
        debug_assert_eq!(indptr[outer_dim], nnz);

        let data = vec![0.0; nnz];
        let inner = match order {
            StorageOrder::RowMajor => CsMat::new((nrows, ncols), indptr, indices, data),
            StorageOrder::ColumnMajor => CsMat::new_csc((nrows, ncols), indptr, indices, data),
        };

        Self {
            inner,
            perm,
            source_slots,
            symmetric_expand,
            injection,
            initialised: false,
        }
    }

    /// Re-apply values from the source triplet through the stored
    /// permutation. On the first call the +/-1 identity entries are written;
    /// they are never overwritten afterwards.
    pub fn refresh_values(&mut self, source: &TripletMat) {
        let data = self.inner.data_mut();
        let mut slot = 0;
        for k in 0..source.nnz() {
            let v = source.values()[k];
            data[self.perm[slot]] = v;
            slot += 1;
            if self.symmetric_expand
                && source.row_indices()[k] != source.col_indices()[k]
            {
                data[self.perm[slot]] = v;
                slot += 1;
            }
        }
        assert_eq!(slot, self.source_slots, "triplet nnz changed after setup");

        if !self.initialised {
            if let Some(inj) = self.injection {
                for d in 0..inj.size {
                    data[self.perm[slot + d]] = 1.0;
                    data[self.perm[slot + inj.size + d]] = -1.0;
                }
            }
            self.initialised = true;
        }
    }

    /// Borrow the compressed matrix for engine consumption.
    pub fn matrix(&self) -> &CsMat<f64> {
        &self.inner
    }

    pub fn nnz(&self) -> usize {
        self.perm.len()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// The permutation from backing slots to compressed positions.
    pub fn order(&self) -> &[usize] {
        &self.perm
    }

    /// Read back every backing slot as (row, col, value), in slot order.
    /// Source slots first, then the identity tail.
    pub fn slot_entries(&self) -> Vec<(usize, usize, f64)> {
        let is_csr = self.inner.is_csr();
        let indices = self.inner.indices();
        let data = self.inner.data();
        let raw = self.inner.indptr().raw_storage().to_vec();

        // Map compressed position -> (row, col).
        let mut pos_coord = vec![(0usize, 0usize); data.len()];
        for o in 0..raw.len() - 1 {
            for p in raw[o]..raw[o + 1] {
                pos_coord[p] = if is_csr {
                    (o, indices[p])
                } else {
                    (indices[p], o)
                };
            }
        }
        self.perm
            .iter()
            .map(|&p| {
                let (i, j) = pos_coord[p];
                (i, j, data[p])
            })
            .collect()
    }
}
