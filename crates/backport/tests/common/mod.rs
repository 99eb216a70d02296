//! Shared fixture: a repository with a `main` line, a `release-21.1` branch,
//! and pull request #100 carrying two commits `A` and `B` on top of `P0`.

#![allow(dead_code)]

use backport::fakes::InMemoryHost;
use backport::{
    CommitAuthor, CommitSha, OriginalPullRequest, PullRequestNumber, RepositoryRef, TeamSlug,
    TreeSha, UserLogin,
};

pub struct Fixture {
    pub host: InMemoryHost,
    pub repo: RepositoryRef,
    pub p0: CommitSha,
    pub release_tip: CommitSha,
    pub release_tree: TreeSha,
    pub a: CommitSha,
    pub b: CommitSha,
    pub original: OriginalPullRequest,
}

pub fn author(name: &str) -> CommitAuthor {
    CommitAuthor {
        name: name.to_string(),
        email: format!("{name}@example.com"),
        date: None,
    }
}

pub fn login(name: &str) -> UserLogin {
    UserLogin::new(name).unwrap()
}

pub fn original(number: u64) -> OriginalPullRequest {
    OriginalPullRequest {
        number: PullRequestNumber::new(number),
        title: "sql: fix planner regression".to_string(),
        body: "The planner picked the wrong index.".to_string(),
        author: login("ada"),
        requested_reviewers: vec![login("carol")],
        requested_teams: vec![TeamSlug::new("sql-queries").unwrap()],
        review_authors: vec![login("bob"), login("carol")],
        labels: vec!["backport-21.1.x".to_string()],
        merged: true,
    }
}

pub fn fixture() -> Fixture {
    let host = InMemoryHost::new();
    let repo = RepositoryRef::new("acme", "db");

    let base_tree = host.write_tree(&[
        ("README.md", "acme db"),
        ("shared.txt", "x"),
        ("version.txt", "main"),
    ]);
    let p0 = host.write_commit(&base_tree, &[], "initial import", Some(author("root")));

    let release_tree = host.write_tree(&[
        ("README.md", "acme db"),
        ("shared.txt", "x"),
        ("version.txt", "21.1"),
    ]);
    let release_tip = host.write_commit(&release_tree, &[&p0], "release 21.1", Some(author("rm")));
    host.set_branch("release-21.1", &release_tip);

    let tree_a = host.write_tree(&[
        ("README.md", "acme db"),
        ("feature.txt", "new feature"),
        ("shared.txt", "x"),
        ("version.txt", "main"),
    ]);
    let a = host.write_commit(
        &tree_a,
        &[&p0],
        "sql: add planner hint\n\nRelease note: None",
        Some(author("ada")),
    );
    let tree_b = host.write_tree(&[
        ("README.md", "acme db"),
        ("feature.txt", "new feature"),
        ("shared.txt", "y"),
        ("version.txt", "main"),
    ]);
    let b = host.write_commit(
        &tree_b,
        &[&a],
        "sql: use hint in shared path",
        Some(author("ada")),
    );
    host.set_branch("main", &b);

    let original = original(100);
    host.add_pull_request(original.clone(), &[&a, &b]);

    Fixture {
        host,
        repo,
        p0,
        release_tip,
        release_tree,
        a,
        b,
        original,
    }
}
