//! In-memory remote store for tests and embedding.
//!
//! [`InMemoryRemote`] simulates the hosted repository model: blobs, flat
//! trees, a chain of commits and one branch ref. Content writes create a
//! commit and advance the branch, exactly like the file-content API does.
//! Every call is counted per [`RemoteOp`], and failures can be queued per
//! operation to exercise retry and conflict paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use repodb_types::{EntryKind, FileChange, ListEntry, VersionToken};

use crate::error::{RemoteError, RemoteResult, STATUS_CONFLICT, STATUS_NOT_FOUND};
use crate::traits::RemoteStore;
use crate::types::{CreatedTree, Fetched, RemoteBlob, TreeEntry};

/// The remote operations an [`InMemoryRemote`] counts and can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    GetContent,
    PutContent,
    DeleteContent,
    ListDir,
    GetRef,
    GetCommitTree,
    CreateTree,
    CreateCommit,
    UpdateRef,
}

#[derive(Debug)]
struct CommitNode {
    tree: String,
    parent: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<String, Bytes>,
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, CommitNode>,
    head: String,
    commit_seq: u64,
    faults: HashMap<RemoteOp, VecDeque<RemoteError>>,
    calls: HashMap<RemoteOp, u64>,
}

impl State {
    fn head_tree(&self) -> &BTreeMap<String, String> {
        let tree = &self.commits[&self.head].tree;
        &self.trees[tree]
    }

    fn store_blob(&mut self, content: Bytes) -> String {
        let sha = object_sha("blob", &content);
        self.blobs.entry(sha.clone()).or_insert(content);
        sha
    }

    fn store_tree(&mut self, entries: BTreeMap<String, String>) -> String {
        let mut buf = Vec::new();
        for (path, sha) in &entries {
            buf.extend_from_slice(path.as_bytes());
            buf.push(0);
            buf.extend_from_slice(sha.as_bytes());
            buf.push(b'\n');
        }
        let sha = object_sha("tree", &buf);
        self.trees.entry(sha.clone()).or_insert(entries);
        sha
    }

    fn store_commit(&mut self, tree: String, parent: Option<String>, message: &str) -> String {
        self.commit_seq += 1;
        let material = format!(
            "{tree}\0{}\0{message}\0{}",
            parent.as_deref().unwrap_or(""),
            self.commit_seq
        );
        let sha = object_sha("commit", material.as_bytes());
        self.commits.insert(sha.clone(), CommitNode { tree, parent });
        sha
    }

    /// Commit `tree` on top of the current head and advance the branch.
    fn advance(&mut self, tree: BTreeMap<String, String>, message: &str) {
        let tree = self.store_tree(tree);
        let parent = Some(self.head.clone());
        self.head = self.store_commit(tree, parent, message);
    }

    fn descends_from(&self, commit: &str, ancestor: &str) -> bool {
        let mut cursor = Some(commit.to_string());
        while let Some(sha) = cursor {
            if sha == ancestor {
                return true;
            }
            cursor = self.commits.get(&sha).and_then(|c| c.parent.clone());
        }
        false
    }
}

fn object_sha(kind: &str, data: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(&[0]);
    hasher.update(data);
    hex::encode(&hasher.finalize().as_bytes()[..20])
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn token(sha: &str) -> VersionToken {
    VersionToken::new(sha).expect("object shas are never empty")
}

/// An in-memory implementation of [`RemoteStore`].
///
/// Clone an `Arc<InMemoryRemote>` into several storage engines to model
/// independent processes sharing one repository.
pub struct InMemoryRemote {
    branch: String,
    state: Mutex<State>,
}

impl InMemoryRemote {
    /// Create a repository with one empty root commit on `main`.
    pub fn new() -> Self {
        Self::with_branch("main")
    }

    /// Create a repository whose single branch is named `branch`.
    pub fn with_branch(branch: impl Into<String>) -> Self {
        let mut state = State::default();
        let tree = state.store_tree(BTreeMap::new());
        state.head = state.store_commit(tree, None, "initial commit");
        Self {
            branch: branch.into(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("lock poisoned")
    }

    /// Count the call and pop a queued failure, if any.
    fn enter(&self, op: RemoteOp) -> RemoteResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    /// Queue `err` as the outcome of the next call to `op`.
    pub fn inject(&self, op: RemoteOp, err: RemoteError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Queue a bare status failure for the next call to `op`.
    pub fn fail_next(&self, op: RemoteOp, status: u16) {
        self.inject(op, RemoteError::status(status, "injected failure"));
    }

    /// Number of calls made to `op` so far, failed ones included.
    pub fn calls(&self, op: RemoteOp) -> u64 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Total number of calls across all operations.
    pub fn total_calls(&self) -> u64 {
        self.lock().calls.values().sum()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Write `content` at `path` directly, bypassing counters and faults.
    pub fn seed(&self, path: &str, content: impl Into<Bytes>) -> VersionToken {
        let mut state = self.lock();
        let sha = state.store_blob(content.into());
        let mut tree = state.head_tree().clone();
        tree.insert(normalize(path).to_string(), sha.clone());
        state.advance(tree, &format!("seed {path}"));
        token(&sha)
    }

    /// Current content at `path`, bypassing counters and faults.
    pub fn file(&self, path: &str) -> Option<Bytes> {
        let state = self.lock();
        let sha = state.head_tree().get(normalize(path))?;
        state.blobs.get(sha).cloned()
    }

    /// Current version of `path`, bypassing counters and faults.
    pub fn version_of(&self, path: &str) -> Option<VersionToken> {
        self.lock().head_tree().get(normalize(path)).map(|s| token(s))
    }

    /// All paths in the current head tree, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock().head_tree().keys().cloned().collect()
    }

    /// Number of commits reachable from the branch head, root included.
    pub fn history_len(&self) -> usize {
        let state = self.lock();
        let mut count = 0;
        let mut cursor = Some(state.head.clone());
        while let Some(sha) = cursor {
            count += 1;
            cursor = state.commits.get(&sha).and_then(|c| c.parent.clone());
        }
        count
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryRemote")
            .field("branch", &self.branch)
            .field("head", &state.head)
            .field("paths", &state.head_tree().len())
            .finish()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    fn branch(&self) -> &str {
        &self.branch
    }

    async fn get_content(
        &self,
        path: &str,
        if_none_match: Option<&VersionToken>,
    ) -> RemoteResult<Fetched> {
        let state = self.enter(RemoteOp::GetContent)?;
        let Some(sha) = state.head_tree().get(normalize(path)) else {
            return Ok(Fetched::Missing);
        };
        if if_none_match.map(VersionToken::as_str) == Some(sha.as_str()) {
            return Ok(Fetched::NotModified);
        }
        Ok(Fetched::Content(RemoteBlob {
            content: state.blobs[sha].clone(),
            version: token(sha),
        }))
    }

    async fn put_content(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> RemoteResult<VersionToken> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(RemoteError::InvalidRequest("empty path".into()));
        }
        let mut state = self.enter(RemoteOp::PutContent)?;
        let current = state.head_tree().get(path).cloned();
        match (expected, current.as_deref()) {
            (None, None) => {}
            (Some(e), Some(c)) if e.as_str() == c => {}
            (None, Some(_)) => {
                return Err(RemoteError::status(
                    STATUS_CONFLICT,
                    format!("{path} exists but no version was supplied"),
                ));
            }
            (Some(e), _) => {
                return Err(RemoteError::status(
                    STATUS_CONFLICT,
                    format!("{path} does not match {e}"),
                ));
            }
        }
        let sha = state.store_blob(content);
        let mut tree = state.head_tree().clone();
        tree.insert(path.to_string(), sha.clone());
        state.advance(tree, message);
        Ok(token(&sha))
    }

    async fn delete_content(
        &self,
        path: &str,
        expected: &VersionToken,
        message: &str,
    ) -> RemoteResult<()> {
        let path = normalize(path);
        let mut state = self.enter(RemoteOp::DeleteContent)?;
        match state.head_tree().get(path) {
            None => {
                return Err(RemoteError::status(STATUS_NOT_FOUND, "Not Found"));
            }
            Some(current) if current != expected.as_str() => {
                return Err(RemoteError::status(
                    STATUS_CONFLICT,
                    format!("{path} does not match {expected}"),
                ));
            }
            Some(_) => {}
        }
        let mut tree = state.head_tree().clone();
        tree.remove(path);
        state.advance(tree, message);
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> RemoteResult<Option<Vec<ListEntry>>> {
        let dir = normalize(path);
        let state = self.enter(RemoteOp::ListDir)?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut files = Vec::new();
        let mut subdirs: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (full, sha) in state.head_tree().range(prefix.clone()..) {
            let Some(rest) = full.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((name, _)) => {
                    let material = subdirs.entry(name.to_string()).or_default();
                    material.extend_from_slice(full.as_bytes());
                    material.extend_from_slice(sha.as_bytes());
                }
                None => files.push(ListEntry {
                    path: full.clone(),
                    name: rest.to_string(),
                    version: token(sha),
                    kind: EntryKind::File,
                }),
            }
        }

        if files.is_empty() && subdirs.is_empty() && !dir.is_empty() {
            return Ok(None);
        }

        let mut entries: Vec<ListEntry> = subdirs
            .into_iter()
            .map(|(name, material)| ListEntry {
                path: format!("{prefix}{name}"),
                version: token(&object_sha("dir", &material)),
                name,
                kind: EntryKind::Dir,
            })
            .chain(files)
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(entries))
    }

    async fn get_ref(&self) -> RemoteResult<String> {
        let state = self.enter(RemoteOp::GetRef)?;
        Ok(state.head.clone())
    }

    async fn get_commit_tree(&self, commit: &str) -> RemoteResult<String> {
        let state = self.enter(RemoteOp::GetCommitTree)?;
        state
            .commits
            .get(commit)
            .map(|c| c.tree.clone())
            .ok_or_else(|| RemoteError::status(STATUS_NOT_FOUND, "commit not found"))
    }

    async fn create_tree(
        &self,
        base_tree: &str,
        changes: &[FileChange],
    ) -> RemoteResult<CreatedTree> {
        let mut state = self.enter(RemoteOp::CreateTree)?;
        let mut tree = state
            .trees
            .get(base_tree)
            .cloned()
            .ok_or_else(|| RemoteError::status(STATUS_NOT_FOUND, "base tree not found"))?;

        for change in changes {
            let path = normalize(&change.path).to_string();
            match &change.content {
                Some(content) => {
                    let sha = state.store_blob(content.clone());
                    tree.insert(path, sha);
                }
                None => {
                    tree.remove(&path);
                }
            }
        }

        let entries = tree
            .iter()
            .map(|(path, sha)| TreeEntry {
                path: path.clone(),
                version: token(sha),
            })
            .collect();
        let sha = state.store_tree(tree);
        Ok(CreatedTree { sha, entries })
    }

    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> RemoteResult<String> {
        let mut state = self.enter(RemoteOp::CreateCommit)?;
        if !state.trees.contains_key(tree) {
            return Err(RemoteError::status(422, "tree not found"));
        }
        if !state.commits.contains_key(parent) {
            return Err(RemoteError::status(422, "parent commit not found"));
        }
        Ok(state.store_commit(tree.to_string(), Some(parent.to_string()), message))
    }

    async fn update_ref(&self, commit: &str) -> RemoteResult<()> {
        let mut state = self.enter(RemoteOp::UpdateRef)?;
        if !state.commits.contains_key(commit) {
            return Err(RemoteError::status(422, "commit not found"));
        }
        let head = state.head.clone();
        if !state.descends_from(commit, &head) {
            return Err(RemoteError::status(
                STATUS_CONFLICT,
                "Update is not a fast forward",
            ));
        }
        state.head = commit.to_string();
        Ok(())
    }
}
