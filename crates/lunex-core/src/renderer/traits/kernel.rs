// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CPU compute kernels attached to compute pipelines.

use std::collections::BTreeMap;

/// The resources and launch size visible to one dispatch of a [`ComputeKernel`].
///
/// Storage buffers are exposed as byte slices keyed by binding; whatever the kernel
/// writes into them is written back to device memory when it returns.
#[derive(Debug, Default)]
pub struct KernelInvocation {
    groups: [u32; 3],
    work_group_size: [u32; 3],
    storage: BTreeMap<u32, Vec<u8>>,
    uniforms: BTreeMap<u32, Vec<u8>>,
}

impl KernelInvocation {
    /// Builds an invocation. Used by backends.
    pub fn new(
        groups: [u32; 3],
        work_group_size: [u32; 3],
        storage: BTreeMap<u32, Vec<u8>>,
        uniforms: BTreeMap<u32, Vec<u8>>,
    ) -> Self {
        Self {
            groups,
            work_group_size,
            storage,
            uniforms,
        }
    }

    /// Number of work groups per axis.
    pub fn groups(&self) -> [u32; 3] {
        self.groups
    }

    /// Local size per axis.
    pub fn work_group_size(&self) -> [u32; 3] {
        self.work_group_size
    }

    /// Total invocations (`groups * work_group_size` over all axes).
    pub fn invocation_count(&self) -> u64 {
        (0..3)
            .map(|i| self.groups[i] as u64 * self.work_group_size[i].max(1) as u64)
            .product()
    }

    /// Read access to the storage buffer bound at `binding`.
    pub fn storage(&self, binding: u32) -> Option<&[u8]> {
        self.storage.get(&binding).map(Vec::as_slice)
    }

    /// Write access to the storage buffer bound at `binding`.
    pub fn storage_mut(&mut self, binding: u32) -> Option<&mut [u8]> {
        self.storage.get_mut(&binding).map(Vec::as_mut_slice)
    }

    /// The uniform buffer bound at `binding`.
    pub fn uniform(&self, binding: u32) -> Option<&[u8]> {
        self.uniforms.get(&binding).map(Vec::as_slice)
    }

    /// Consumes the invocation, returning storage contents for write-back.
    pub fn into_storage(self) -> BTreeMap<u32, Vec<u8>> {
        self.storage
    }
}

/// CPU code run in place of a compute shader body.
pub trait ComputeKernel: Send + Sync {
    /// Runs one dispatch.
    fn execute(&self, invocation: &mut KernelInvocation);
}

impl<F> ComputeKernel for F
where
    F: Fn(&mut KernelInvocation) + Send + Sync,
{
    fn execute(&self, invocation: &mut KernelInvocation) {
        self(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_kernels() {
        let kernel = |inv: &mut KernelInvocation| {
            if let Some(data) = inv.storage_mut(0) {
                data.iter_mut().for_each(|b| *b = b.wrapping_mul(2));
            }
        };
        let mut storage = BTreeMap::new();
        storage.insert(0, vec![1u8, 2, 3]);
        let mut inv = KernelInvocation::new([2, 1, 1], [64, 1, 1], storage, BTreeMap::new());
        ComputeKernel::execute(&kernel, &mut inv);
        assert_eq!(inv.invocation_count(), 128);
        assert_eq!(inv.into_storage()[&0], vec![2, 4, 6]);
    }
}
