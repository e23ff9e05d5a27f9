//! Per-resource instruction blocks handed to the agent.
//!
//! Each block tells the model where a resource lives in the search
//! filesystem, where it came from, and how answers should cite it.

use super::metadata::ResourceProvenance;
use crate::resource::VirtualizedResource;

/// GitHub-style blob URL prefix for a repository reference.
///
/// Trailing slashes and a trailing `.git` are stripped before
/// `/blob/<ref>` is appended.
pub fn blob_url_prefix(repository_url: &str, reference: &str) -> String {
    let base = repository_url.trim_end_matches('/');
    let base = base.strip_suffix(".git").unwrap_or(base);
    let base = base.trim_end_matches('/');
    format!("{}/blob/{}", base, reference)
}

/// Percent-encode each path segment individually, keeping the
/// separators literal.
pub fn encode_path_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the instruction block for one loaded resource.
pub fn instruction_block(
    resource: &VirtualizedResource,
    virtual_path: &str,
    provenance: &ResourceProvenance,
) -> String {
    let mut block = format!(
        "## Resource: {} ({})\n\
         All files of this resource are mounted under {} in the search filesystem. \
         Always use paths starting with {} when reading or searching it; never invent paths outside it.",
        resource.name,
        resource.kind.as_str(),
        virtual_path,
        virtual_path,
    );

    match provenance {
        ResourceProvenance::Git {
            url,
            branch,
            commit,
            ..
        } => {
            block.push_str(&format!("\nRepository: {}", url));
            if let Some(branch) = branch {
                block.push_str(&format!("\nBranch: {}", branch));
            }
            if let Some(commit) = commit {
                block.push_str(&format!("\nCommit: {}", commit));
            }
            let reference = commit
                .as_deref()
                .or(branch.as_deref())
                .unwrap_or("main");
            // Branch names may contain slashes; encode per segment.
            let prefix = blob_url_prefix(url, &encode_path_segments(reference));
            block.push_str(&format!(
                "\nCitation rule: cite files as {}/<path>, where <path> is the file's path \
                 inside the repository with every segment percent-encoded.",
                prefix
            ));
        }
        ResourceProvenance::Package {
            ecosystem,
            package,
            version,
            ..
        } => {
            let version = version.as_deref().unwrap_or("latest");
            block.push_str(&format!(
                "\nPackage: {}:{}@{}",
                ecosystem, package, version
            ));
            block.push_str(&format!(
                "\nCitation rule: cite this resource as {}:{}@{} followed by the file path; \
                 do not fabricate web URLs for it.",
                ecosystem, package, version
            ));
        }
        ResourceProvenance::Local { path, .. } => {
            block.push_str(&format!("\nOrigin: local directory {}", path));
            block.push_str(
                "\nCitation rule: cite files from this resource by their local path only; \
                 it has no public URL.",
            );
        }
    }

    if !resource.focus.is_empty() {
        block.push_str(&format!(
            "\nLook at these sub-paths first: {}",
            resource.focus.join(", ")
        ));
    }
    if let Some(notes) = &resource.notes {
        block.push_str(&format!("\nNotes: {}", notes));
    }

    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn resource(name: &str, kind: ResourceKind) -> VirtualizedResource {
        VirtualizedResource {
            name: name.to_string(),
            fs_name: crate::resource::derive_fs_name(name),
            kind,
            real_path: std::path::PathBuf::from("/tmp/x"),
            focus: Vec::new(),
            notes: None,
            cleanup: None,
        }
    }

    #[test]
    fn test_blob_url_prefix_strips_git_suffix() {
        assert_eq!(
            blob_url_prefix("https://github.com/a/b.git", "main"),
            "https://github.com/a/b/blob/main"
        );
        assert_eq!(
            blob_url_prefix("https://github.com/a/b/", "abc123"),
            "https://github.com/a/b/blob/abc123"
        );
        assert_eq!(
            blob_url_prefix("https://github.com/a/b.git/", "v1"),
            "https://github.com/a/b/blob/v1"
        );
    }

    #[test]
    fn test_encode_path_segments() {
        assert_eq!(
            encode_path_segments("src/hello world/ü.rs"),
            "src/hello%20world/%C3%BC.rs"
        );
        assert_eq!(encode_path_segments("plain/path.rs"), "plain/path.rs");
    }

    #[test]
    fn test_git_block_prefers_commit_reference() {
        let prov = ResourceProvenance::Git {
            name: "tokio".to_string(),
            url: "https://github.com/tokio-rs/tokio.git".to_string(),
            branch: Some("master".to_string()),
            commit: Some("deadbeef".to_string()),
        };
        let block = instruction_block(&resource("tokio", ResourceKind::Git), "/sources/tokio", &prov);
        assert!(block.contains("## Resource: tokio (git)"));
        assert!(block.contains("/sources/tokio"));
        assert!(block.contains("https://github.com/tokio-rs/tokio/blob/deadbeef/"));
        assert!(block.contains("Branch: master"));
    }

    #[test]
    fn test_package_block_has_citation_alias() {
        let prov = ResourceProvenance::Package {
            name: "lp".to_string(),
            ecosystem: "npm".to_string(),
            package: "left-pad".to_string(),
            version: Some("1.3.0".to_string()),
        };
        let block = instruction_block(&resource("lp", ResourceKind::Package), "/sources/lp", &prov);
        assert!(block.contains("npm:left-pad@1.3.0"));
        assert!(block.contains("do not fabricate web URLs"));
    }

    #[test]
    fn test_local_block_cites_local_paths_only() {
        let prov = ResourceProvenance::Local {
            name: "notes".to_string(),
            path: "/home/me/notes".to_string(),
        };
        let block = instruction_block(&resource("notes", ResourceKind::Local), "/sources/notes", &prov);
        assert!(block.contains("local path only"));
    }

    #[test]
    fn test_focus_and_notes_are_rendered() {
        let mut res = resource("demo", ResourceKind::Local);
        res.focus = vec!["src".to_string(), "docs".to_string()];
        res.notes = Some("Prefer the v2 API.".to_string());
        let prov = ResourceProvenance::Local {
            name: "demo".to_string(),
            path: "/d".to_string(),
        };
        let block = instruction_block(&res, "/sources/demo", &prov);
        assert!(block.contains("Look at these sub-paths first: src, docs"));
        assert!(block.contains("Notes: Prefer the v2 API."));
    }
}
