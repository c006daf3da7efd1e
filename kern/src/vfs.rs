// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The VFS naming layer (C9): path resolution, the node cache/tree, `/dev`
//! and mount points, and the driver-backed `FS_GET_NODE`/
//! `FS_GET_NODE_CHILDREN` calls that fill in everything the tree doesn't
//! already know.
//!
//! TaskFS (§4.11) is folded in here rather than as a separate module: it's a
//! consumer of the same node/children contract every other filesystem driver
//! implements, just backed by the scheduler's task table instead of an RP
//! round trip to a disk-backed driver.

use alloc::string::String;
use alloc::vec::Vec;

use abi::{FilesystemControlOp, RpCode, Status, VfsNodeFlags, VfsNodeType};

use crate::device::DeviceId;
use crate::driver::DriverRegistry;
use crate::object::ObjectHeader;
use crate::rp::Rp;

ringbuf!(VFS_RINGBUF, VfsEvent, 32, VfsEvent::Idle);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum VfsEvent {
    Idle,
    ResolveMiss,
    DuplicateInsert,
    MountDescend(NodeId),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// What a filesystem driver hands back from `FS_GET_NODE`: a detached
/// descriptor the VFS still has to allocate and link (§9 "get node returns a
/// detached node").
#[derive(Clone, Debug)]
pub struct FsNodeResult {
    pub name: String,
    pub flags: VfsNodeFlags,
    pub ty: VfsNodeType,
    pub device: Option<DeviceId>,
}

#[derive(Clone, Debug)]
pub struct FsNodeRequest {
    pub parent: NodeId,
    pub name: String,
}

pub struct VfsNode {
    header: ObjectHeader,
    pub name: String,
    pub flags: VfsNodeFlags,
    pub ty: VfsNodeType,
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
    ref_count: u32,
    pub device: Option<DeviceId>,
    /// For a `MOUNT_POINT` node, the root of the mounted filesystem that
    /// subsequent path components transparently descend into.
    pub mount_target: Option<NodeId>,
    /// TaskFS-style virtual content: which task this node describes, if it's
    /// part of the TaskFS subtree.
    pub task_private: Option<abi::TaskId>,
}

impl VfsNode {
    fn new(name: &str, ty: VfsNodeType, flags: VfsNodeFlags) -> Self {
        VfsNode {
            header: ObjectHeader::new(),
            name: String::from(name),
            flags,
            ty,
            parent: None,
            children: Vec::new(),
            ref_count: 0,
            device: None,
            mount_target: None,
            task_private: None,
        }
    }

    pub fn lock(&self) -> crate::sync::SpinlockGuard<'_> {
        self.header.lock()
    }

    pub fn is_mount_point(&self) -> bool {
        self.flags.contains(VfsNodeFlags::MOUNT_POINT)
    }
}

/// The VFS node arena and root. One instance is the system's VFS singleton
/// (see [`crate::startup`]).
pub struct Vfs {
    nodes: Vec<Option<VfsNode>>,
    root: NodeId,
    dev: NodeId,
}

impl Vfs {
    /// Builds a fresh tree with `/` and `/dev`, both persistent per the
    /// node invariant "the root is persistent".
    pub fn new() -> Self {
        let mut nodes = Vec::new();
        let mut root = VfsNode::new("", VfsNodeType::Directory, VfsNodeFlags::PERSISTENT | VfsNodeFlags::VFS_DIRECTORY);
        root.ref_count = 1;
        nodes.push(Some(root));
        let root_id = NodeId(0);

        let mut dev = VfsNode::new("dev", VfsNodeType::Directory, VfsNodeFlags::PERSISTENT | VfsNodeFlags::VFS_DIRECTORY);
        dev.parent = Some(root_id);
        dev.ref_count = 1;
        nodes.push(Some(dev));
        let dev_id = NodeId(1);
        nodes[0].as_mut().unwrap().children.push(dev_id);

        Vfs { nodes, root: root_id, dev: dev_id }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn dev(&self) -> NodeId {
        self.dev
    }

    pub fn get(&self, id: NodeId) -> Option<&VfsNode> {
        self.nodes.get(id.0 as usize).and_then(|n| n.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut VfsNode> {
        self.nodes.get_mut(id.0 as usize).and_then(|n| n.as_mut())
    }

    fn alloc(&mut self, node: VfsNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    fn find_child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?.children.iter().copied().find(|&c| self.get(c).map(|n| n.name == name).unwrap_or(false))
    }

    /// Links `child` under `parent`, double-checking for a race-losing
    /// concurrent insert per §4.8 step 3. Rejects a duplicate name with
    /// `FILE_ALREADY_EXISTS`.
    fn link(&mut self, parent: NodeId, child: NodeId) -> Status {
        if self.find_child_by_name(parent, &self.get(child).unwrap().name).is_some() {
            ringbuf_entry!(VFS_RINGBUF, VfsEvent::DuplicateInsert);
            return Status::AlreadyExists;
        }
        self.get_mut(child).unwrap().parent = Some(parent);
        self.get_mut(parent).unwrap().children.push(child);
        Status::Ok
    }

    /// `createDeviceFile`: populates `/dev` with a device node. Names are
    /// unique within `/dev` (§4.8).
    pub fn create_device_file(&mut self, device: DeviceId, flags: VfsNodeFlags, name: &str) -> Result<NodeId, Status> {
        if self.find_child_by_name(self.dev, name).is_some() {
            return Err(Status::AlreadyExists);
        }
        let mut node = VfsNode::new(name, VfsNodeType::Device, flags);
        node.device = Some(device);
        let id = self.alloc(node);
        let status = self.link(self.dev, id);
        if status.is_ok() {
            Ok(id)
        } else {
            Err(status)
        }
    }

    /// Resolves `path` component by component starting at the VFS root.
    /// `ask_driver` is invoked whenever a component is absent from the cache
    /// and the parent's backing device is a filesystem device; it should
    /// dispatch an `FS_GET_NODE` RP and report the driver's answer.
    pub fn resolve<F>(&mut self, path: &str, mut ask_driver: F) -> Result<NodeId, Status>
    where
        F: FnMut(DeviceId, NodeId, &str) -> Result<FsNodeResult, Status>,
    {
        if !path.starts_with('/') {
            return Err(Status::PathSyntax);
        }
        let mut current = self.root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.resolve_one(current, component, &mut ask_driver)?;
            if let Some(target) = self.get(current).and_then(|n| if n.is_mount_point() { n.mount_target } else { None }) {
                ringbuf_entry!(VFS_RINGBUF, VfsEvent::MountDescend(target));
                current = target;
            }
        }
        Ok(current)
    }

    fn resolve_one<F>(&mut self, parent: NodeId, name: &str, ask_driver: &mut F) -> Result<NodeId, Status>
    where
        F: FnMut(DeviceId, NodeId, &str) -> Result<FsNodeResult, Status>,
    {
        if let Some(found) = self.find_child_by_name(parent, name) {
            return Ok(found);
        }
        let Some(device) = self.get(parent).and_then(|n| n.device) else {
            ringbuf_entry!(VFS_RINGBUF, VfsEvent::ResolveMiss);
            return Err(Status::FileNotFound);
        };
        match ask_driver(device, parent, name) {
            Ok(result) => {
                let mut node = VfsNode::new(&result.name, result.ty, result.flags);
                // A plain file under a mounted filesystem has no device of
                // its own; route its I/O through the same backing device as
                // its parent unless the driver names a different one (e.g.
                // a nested mount).
                node.device = result.device.or_else(|| self.get(parent).and_then(|p| p.device));
                let id = self.alloc(node);
                if result.flags.contains(VfsNodeFlags::NO_CACHE) {
                    // Caller gets a usable, but unlinked, node: it will not
                    // survive past last close, per the node-cache invariant.
                    return Ok(id);
                }
                // Double-check: another resolver may have inserted the same
                // name while we were waiting on the driver.
                if let Some(existing) = self.find_child_by_name(parent, name) {
                    return Ok(existing);
                }
                self.link(parent, id);
                Ok(id)
            }
            Err(status) => {
                ringbuf_entry!(VFS_RINGBUF, VfsEvent::ResolveMiss);
                Err(status)
            }
        }
    }

    /// Creates a mount point node at `path` and wires it to `fs_root`, the
    /// root node of the mounted filesystem, per §4.9's final step.
    pub fn mount_at(&mut self, parent: NodeId, name: &str, fs_root: NodeId) -> Result<NodeId, Status> {
        let mut node = VfsNode::new(name, VfsNodeType::Mount, VfsNodeFlags::MOUNT_POINT | VfsNodeFlags::PERSISTENT);
        node.mount_target = Some(fs_root);
        let id = self.alloc(node);
        let status = self.link(parent, id);
        if status.is_ok() {
            Ok(id)
        } else {
            Err(status)
        }
    }

    pub fn open_ref(&mut self, id: NodeId) {
        if let Some(n) = self.get_mut(id) {
            n.ref_count += 1;
        }
    }

    /// Drops a reference; reaps the node if it hits zero, is not persistent,
    /// and has no children (the node-cache invariant for `noCache` nodes, and
    /// general reclamation for everything else per §3's lifecycle summary).
    pub fn close_ref(&mut self, id: NodeId) {
        let should_reap = match self.get_mut(id) {
            Some(n) => {
                n.ref_count = n.ref_count.saturating_sub(1);
                n.ref_count == 0 && !n.flags.contains(VfsNodeFlags::PERSISTENT) && n.children.is_empty()
            }
            None => false,
        };
        if should_reap {
            if let Some(parent) = self.get(id).and_then(|n| n.parent) {
                if let Some(p) = self.get_mut(parent) {
                    p.children.retain(|&c| c != id);
                }
            }
            self.nodes[id.0 as usize] = None;
        }
    }

    /// `FS_GET_NODE_CHILDREN`: for a directory with no backing filesystem
    /// device, the cache already holds the full truth. Otherwise issues the
    /// RP to `driver` and links every returned child that isn't already
    /// cached, same dedup discipline as `resolve_one`.
    pub fn get_node_children(
        &mut self,
        drivers: &mut DriverRegistry,
        driver_id: crate::driver::DriverId,
        parent: NodeId,
    ) -> Result<Vec<NodeId>, Status> {
        let Some(device) = self.get(parent).and_then(|n| n.device) else {
            return Ok(self.get(parent).map(|n| n.children.clone()).unwrap_or_default());
        };
        let Some(driver) = drivers.get_mut(driver_id) else {
            return Err(Status::DriverNotFound);
        };
        let mut rp = Rp::new(RpCode::FilesystemControl, device);
        rp.fill(crate::rp::RpPayload::FilesystemControl(FilesystemControlOp::GetNodeChildren));
        rp.fs_node_request = Some(FsNodeRequest {
            parent,
            name: String::new(),
        });
        let status = driver.dispatch(&mut rp);
        if !rp.is_finalized() {
            rp.status = status;
            rp.finalize();
        }
        if !status.is_ok() {
            return Err(status);
        }
        let mut ids = Vec::new();
        for result in rp.fs_children_result.take().unwrap_or_default() {
            let id = match self.find_child_by_name(parent, &result.name) {
                Some(existing) => existing,
                None => {
                    let mut node = VfsNode::new(&result.name, result.ty, result.flags);
                    node.device = result.device.or(Some(device));
                    let id = self.alloc(node);
                    if !result.flags.contains(VfsNodeFlags::NO_CACHE) {
                        self.link(parent, id);
                    }
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// TaskFS: exposes `/task/<tid>/{name,state}` virtual nodes backed by the
/// scheduler's task table rather than any on-disk structure (§4.11). These
/// are tagged `VIRTUAL` and never persisted.
pub fn taskfs_children(vfs: &mut Vfs, taskfs_root: NodeId, sched: &crate::sched::Scheduler, tids: &[abi::TaskId]) -> Vec<NodeId> {
    let mut out = Vec::new();
    for &tid in tids {
        if sched.get(tid).is_none() {
            continue;
        }
        let mut name_buf = String::new();
        let _ = core::fmt::write(&mut name_buf, format_args!("{}", tid.index));
        let existing = vfs.find_child_by_name(taskfs_root, &name_buf);
        let task_dir = match existing {
            Some(id) => id,
            None => {
                let mut dir = VfsNode::new(&name_buf, VfsNodeType::Directory, VfsNodeFlags::VIRTUAL | VfsNodeFlags::VFS_DIRECTORY);
                dir.task_private = Some(tid);
                let id = vfs.alloc(dir);
                vfs.link(taskfs_root, id);
                id
            }
        };
        out.push(task_dir);

        for attr in ["name", "state"] {
            if vfs.find_child_by_name(task_dir, attr).is_some() {
                continue;
            }
            let mut attr_node = VfsNode::new(attr, VfsNodeType::File, VfsNodeFlags::VIRTUAL | VfsNodeFlags::NO_CACHE);
            attr_node.task_private = Some(tid);
            let id = vfs.alloc(attr_node);
            vfs.link(task_dir, id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::DriverFlags;
    use alloc::boxed::Box;

    struct FsDriver;
    impl crate::driver::DriverOps for FsDriver {
        fn dispatch(&mut self, rp: &mut Rp) -> Status {
            rp.fs_children_result = Some(alloc::vec![FsNodeResult {
                name: String::from("a.txt"),
                flags: VfsNodeFlags::empty(),
                ty: VfsNodeType::File,
                device: None,
            }]);
            Status::Ok
        }
    }

    #[test]
    fn get_node_children_links_driver_supplied_nodes() {
        let mut vfs = Vfs::new();
        vfs.get_mut(vfs.dev()).unwrap().device = Some(DeviceId(7));
        let mut drivers = DriverRegistry::new();
        let driver_id = drivers
            .register("fs.drv", DriverFlags::empty(), Box::new(FsDriver))
            .unwrap();
        let children = vfs.get_node_children(&mut drivers, driver_id, vfs.dev()).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(vfs.get(children[0]).unwrap().name, "a.txt");
    }

    #[test]
    fn taskfs_children_builds_virtual_nodes_per_task() {
        let mut vfs = Vfs::new();
        let mut sched = crate::sched::Scheduler::new();
        let t1 = sched.spawn(1, None, "init", "/sbin/init");
        let taskfs_root = vfs.alloc(VfsNode::new("task", VfsNodeType::Directory, VfsNodeFlags::VIRTUAL | VfsNodeFlags::VFS_DIRECTORY));
        let dirs = taskfs_children(&mut vfs, taskfs_root, &sched, &[t1]);
        assert_eq!(dirs.len(), 1);
        let attrs = &vfs.get(dirs[0]).unwrap().children;
        assert_eq!(attrs.len(), 2);
        for &attr in attrs {
            assert!(vfs.get(attr).unwrap().flags.contains(VfsNodeFlags::VIRTUAL));
        }
    }

    #[test]
    fn root_and_dev_exist_and_are_persistent() {
        let vfs = Vfs::new();
        assert!(vfs.get(vfs.root()).unwrap().flags.contains(VfsNodeFlags::PERSISTENT));
        assert!(vfs.get(vfs.dev()).unwrap().flags.contains(VfsNodeFlags::PERSISTENT));
    }

    #[test]
    fn create_device_file_then_resolve() {
        let mut vfs = Vfs::new();
        vfs.create_device_file(DeviceId(0), VfsNodeFlags::empty(), "null").unwrap();
        let resolved = vfs.resolve("/dev/null", |_, _, _| Err(Status::FileNotFound)).unwrap();
        assert_eq!(vfs.get(resolved).unwrap().name, "null");
    }

    #[test]
    fn duplicate_device_file_rejected() {
        let mut vfs = Vfs::new();
        vfs.create_device_file(DeviceId(0), VfsNodeFlags::empty(), "null").unwrap();
        assert_eq!(
            vfs.create_device_file(DeviceId(1), VfsNodeFlags::empty(), "null"),
            Err(Status::AlreadyExists)
        );
    }

    #[test]
    fn lookup_miss_leaves_tree_unchanged() {
        let mut vfs = Vfs::new();
        let before = vfs.get(vfs.dev()).unwrap().children.len();
        let result = vfs.resolve("/dev/does-not-exist", |_, _, _| Err(Status::FileNotFound));
        assert_eq!(result, Err(Status::FileNotFound));
        assert_eq!(vfs.get(vfs.dev()).unwrap().children.len(), before);
    }

    #[test]
    fn driver_backed_resolve_links_detached_node() {
        let mut vfs = Vfs::new();
        // Mark /dev as filesystem-backed for this test so resolve_one will
        // ask the driver instead of failing fast.
        vfs.get_mut(vfs.dev()).unwrap().device = Some(DeviceId(7));
        let resolved = vfs
            .resolve("/dev/file.txt", |_, _, name| {
                Ok(FsNodeResult {
                    name: String::from(name),
                    flags: VfsNodeFlags::empty(),
                    ty: VfsNodeType::File,
                    device: None,
                })
            })
            .unwrap();
        assert_eq!(vfs.get(resolved).unwrap().name, "file.txt");
    }

    #[test]
    fn no_cache_node_is_not_linked() {
        let mut vfs = Vfs::new();
        vfs.get_mut(vfs.dev()).unwrap().device = Some(DeviceId(7));
        let before = vfs.get(vfs.dev()).unwrap().children.len();
        vfs.resolve("/dev/scratch", |_, _, name| {
            Ok(FsNodeResult {
                name: String::from(name),
                flags: VfsNodeFlags::NO_CACHE,
                ty: VfsNodeType::File,
                device: None,
            })
        })
        .unwrap();
        assert_eq!(vfs.get(vfs.dev()).unwrap().children.len(), before);
    }

    #[test]
    fn mount_point_transparently_descends() {
        let mut vfs = Vfs::new();
        let mounted_root = vfs.alloc(VfsNode::new("", VfsNodeType::Directory, VfsNodeFlags::PERSISTENT));
        let mount = vfs.mount_at(vfs.root(), "mnt", mounted_root).unwrap();
        assert!(vfs.get(mount).unwrap().is_mount_point());

        let mut child = VfsNode::new("inside", VfsNodeType::File, VfsNodeFlags::empty());
        child.parent = Some(mounted_root);
        let child_id = vfs.alloc(child);
        vfs.get_mut(mounted_root).unwrap().children.push(child_id);

        let resolved = vfs.resolve("/mnt/inside", |_, _, _| Err(Status::FileNotFound)).unwrap();
        assert_eq!(resolved, child_id);
    }

    #[test]
    fn acyclicity_walk_to_root_terminates() {
        let mut vfs = Vfs::new();
        vfs.create_device_file(DeviceId(0), VfsNodeFlags::empty(), "null").unwrap();
        let mut cur = vfs.find_child_by_name(vfs.dev(), "null").unwrap();
        let mut steps = 0;
        while let Some(p) = vfs.get(cur).unwrap().parent {
            cur = p;
            steps += 1;
            assert!(steps < 100);
        }
        assert_eq!(cur, vfs.root());
    }
}
