// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Serialization of a [`PackageTree`] into the binary cache format.
//!
//! Each package is encoded as a length-prefixed blob so readers can skip
//! whole packages without decoding them. Within a blob, attributes appear in
//! fetch-stage order: name, then versions, then the one-time fields.

use std::io::Write;

use crate::data::{ExtendedVersion, Package, PackageTree};
use crate::database::header::DbHeader;
use crate::database::io::{write_bitset, write_string, write_string_list, write_varint};

fn write_version(w: &mut impl Write, version: &ExtendedVersion) -> std::io::Result<()> {
    let parts = version.version.parts();
    write_varint(w, parts.len() as u64)?;
    for part in parts {
        w.write_all(&[part.kind.to_tag()])?;
        write_string(w, &part.payload)?;
    }
    write_string(w, &version.full_keywords)?;
    write_string(w, &version.slot)?;
    write_string_list(w, &version.iuse)?;
    write_bitset(w, version.restrict.bits())?;
    write_bitset(w, version.properties.bits())?;
    write_varint(w, version.overlay_key as u64)?;
    write_string(w, &version.depend)?;
    write_string(w, &version.rdepend)?;
    write_string(w, &version.pdepend)?;
    Ok(())
}

fn encode_package(pkg: &Package) -> std::io::Result<Vec<u8>> {
    let mut blob = Vec::new();
    let w = &mut blob;
    write_string(w, &pkg.name)?;
    write_varint(w, pkg.versions.len() as u64)?;
    for version in &pkg.versions {
        write_version(w, version)?;
    }
    write_string(w, &pkg.description)?;
    write_string(w, &pkg.homepage)?;
    write_string(w, &pkg.licenses)?;
    write_string(w, &pkg.provide)?;
    let coll_iuse: Vec<String> = pkg.coll_iuse.iter().cloned().collect();
    write_string_list(w, &coll_iuse)?;
    Ok(blob)
}

/// Writes the full cache: header, then per category the name, package count
/// and package blobs. Category and package counts in the written header are
/// recomputed from the tree.
pub fn write_tree(
    w: &mut impl Write,
    tree: &PackageTree,
    template: &DbHeader,
) -> std::io::Result<()> {
    let mut header = template.clone();
    header.num_categories = tree.num_categories() as u32;
    header.num_packages = tree.num_packages() as u32;
    header.write(w)?;

    for category in tree.categories() {
        write_string(w, &category.name)?;
        write_varint(w, category.packages.len() as u64)?;
        for pkg in category.packages.values() {
            let blob = encode_package(pkg)?;
            write_varint(w, blob.len() as u64)?;
            w.write_all(&blob)?;
        }
    }
    Ok(())
}
