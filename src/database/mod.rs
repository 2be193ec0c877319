// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! On-disk index format: header, codec primitives, writer and the lazy
//! streaming reader.

pub mod header;
pub mod io;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use crate::data::{ExtendedVersion, PackageTree};
    use crate::database::header::DbHeader;
    use crate::database::reader::{FetchStage, PackageReader};
    use crate::database::writer::write_tree;
    use crate::flags::RestrictFlags;
    use crate::testutil::sample_header;
    use crate::version::Version;

    fn sample_tree() -> PackageTree {
        let mut tree = PackageTree::new();
        let cat = tree.insert("app-editors");
        let pkg = cat.add_package("vim");
        pkg.description = "Vim, an improved vi-style text editor".to_owned();
        pkg.homepage = "https://www.vim.org/".to_owned();
        pkg.licenses = "vim".to_owned();
        pkg.coll_iuse = BTreeSet::from(["acl".to_owned(), "x".to_owned()]);
        let mut v = ExtendedVersion::new(Version::parse("9.0.1", true).unwrap());
        v.slot = "0".to_owned();
        v.full_keywords = "amd64 ~arm".to_owned();
        v.iuse = vec!["acl".to_owned(), "x".to_owned()];
        v.restrict = RestrictFlags::TEST;
        v.overlay_key = 1;
        v.depend = ">=sys-libs/ncurses-5.2-r2:0=".to_owned();
        pkg.add_version(v);
        pkg.add_version(ExtendedVersion::new(Version::parse("8.2", true).unwrap()));

        let cat = tree.insert("dev-lang");
        cat.add_package("rust").description = "Systems programming language".to_owned();
        tree
    }

    fn encode(tree: &PackageTree) -> Vec<u8> {
        let mut buf = Vec::new();
        write_tree(&mut buf, tree, &sample_header()).unwrap();
        buf
    }

    #[test]
    fn test_roundtrip_through_reader() {
        let tree = sample_tree();
        let buf = encode(&tree);

        let mut cursor = Cursor::new(&buf);
        let header = DbHeader::read(&mut cursor).unwrap();
        assert_eq!(header.num_categories, 2);
        assert_eq!(header.num_packages, 2);

        let mut reader = PackageReader::new(cursor, &header);
        let mut seen = Vec::new();
        while reader.next().unwrap() {
            reader.read(FetchStage::All).unwrap();
            seen.push(reader.take());
        }
        assert_eq!(seen.len(), 2);

        let vim = &seen[0];
        assert_eq!(vim.cat_name(), "app-editors/vim");
        assert_eq!(vim.description, "Vim, an improved vi-style text editor");
        assert_eq!(vim.versions.len(), 2);
        let v = &vim.versions[0];
        assert_eq!(v.version.full(), "9.0.1");
        assert_eq!(v.full_keywords, "amd64 ~arm");
        assert_eq!(v.restrict, RestrictFlags::TEST);
        assert_eq!(v.overlay_key, 1);
        assert_eq!(v.depend, ">=sys-libs/ncurses-5.2-r2:0=");
        assert_eq!(vim.coll_iuse, BTreeSet::from(["acl".into(), "x".into()]));

        assert_eq!(seen[1].cat_name(), "dev-lang/rust");
    }

    #[test]
    fn test_lazy_skip_does_not_decode() {
        let buf = encode(&sample_tree());
        let mut cursor = Cursor::new(&buf);
        let header = DbHeader::read(&mut cursor).unwrap();
        let mut reader = PackageReader::new(cursor, &header);

        // Read only the name of the first package, then skip to the second.
        assert!(reader.next().unwrap());
        reader.read(FetchStage::Name).unwrap();
        assert_eq!(reader.get().name, "vim");
        assert!(reader.get().versions.is_empty());

        assert!(reader.next().unwrap());
        reader.read(FetchStage::Versions).unwrap();
        assert_eq!(reader.get().name, "rust");
        assert!(!reader.next().unwrap());
    }

    #[test]
    fn test_truncated_file_reports_decode_error() {
        let buf = encode(&sample_tree());
        let cut = &buf[..buf.len() - 10];
        let mut cursor = Cursor::new(cut);
        let header = DbHeader::read(&mut cursor).unwrap();
        let mut reader = PackageReader::new(cursor, &header);

        let mut result = Ok(true);
        while matches!(result, Ok(true)) {
            result = reader.next().and_then(|more| {
                if more {
                    reader.read(FetchStage::All)?;
                }
                Ok(more)
            });
        }
        assert!(result.is_err());
    }
}
