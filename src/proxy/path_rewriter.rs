//! Computes the upstream path from the inbound path and mount path

use crate::proxy::hooks::PathTransform;
use crate::proxy::types::*;
use http::request::Parts;

/// Strip everything up to and including the first occurrence of the mount
/// path, then hand the remainder to the path transform.
///
/// The query string is not touched here; the engine appends it verbatim.
pub fn compute_target_path(
    request_path: &str,
    mount_path: &MountPath,
    transform: &dyn PathTransform,
    request: &Parts,
) -> ProxyResult<String> {
    let mount = mount_path.as_ref();
    let start = request_path
        .find(mount)
        .ok_or_else(|| ProxyError::mount_path_not_found(request_path, mount_path))?;

    let path_after_mount = &request_path[start + mount.len()..];
    Ok(transform.create_path(path_after_mount, request))
}
