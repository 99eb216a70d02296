//! Cherry-pick engine behaviour against the in-memory host.

mod common;

use backport::engine::TEMP_COMMIT_MESSAGE;
use backport::fakes::{HostCall, HostOperation};
use backport::{
    BackportError, BackportSettings, BranchNaming, CherryPickEngine, HostError, SessionStage,
};
use common::{author, fixture, login};

const BACKPORT_BRANCH: &str = "relbot/backport-release-21.1-100";

fn engine(host: &backport::fakes::InMemoryHost) -> CherryPickEngine<'_> {
    CherryPickEngine::new(host, BranchNaming::new(&BackportSettings::default()))
}

#[tokio::test]
async fn replays_each_commit_through_temp_commit_and_server_merge() {
    let f = fixture();
    let done = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    assert_eq!(done.target.as_str(), "release-21.1");
    assert_eq!(done.backport_branch.as_str(), BACKPORT_BRANCH);
    assert_eq!(done.commits, 2);
    assert!(done.follow_up.is_empty());

    let calls = f.host.calls();
    let start = calls
        .iter()
        .position(|c| matches!(c, HostCall::CreateRef { .. }))
        .unwrap();
    assert_eq!(
        calls[start],
        HostCall::CreateRef {
            branch: BACKPORT_BRANCH.to_string(),
            sha: f.release_tip.to_string(),
        }
    );

    let ops: Vec<HostOperation> = calls[start + 1..].iter().map(HostCall::operation).collect();
    assert_eq!(
        ops,
        vec![
            HostOperation::CreateCommit,
            HostOperation::ForceUpdateRef,
            HostOperation::MergeBranches,
            HostOperation::CreateCommit,
            HostOperation::ForceUpdateRef,
            HostOperation::CreateCommit,
            HostOperation::ForceUpdateRef,
            HostOperation::MergeBranches,
            HostOperation::CreateCommit,
            HostOperation::ForceUpdateRef,
            HostOperation::CreatePullRequest,
            HostOperation::RequestReviewers,
            HostOperation::AddAssignees,
        ]
    );

    // tmp1: target tree, parented on A's parent.
    let HostCall::CreateCommit { message, tree, parents } = &calls[start + 1] else {
        panic!("expected temp commit");
    };
    assert_eq!(message, TEMP_COMMIT_MESSAGE);
    assert_eq!(tree, f.release_tree.as_str());
    assert_eq!(parents, &vec![f.p0.to_string()]);

    assert_eq!(
        calls[start + 3],
        HostCall::MergeBranches {
            base: BACKPORT_BRANCH.to_string(),
            head: f.a.to_string(),
        }
    );

    // First real commit: parented on the release tip.
    let HostCall::CreateCommit { tree: merged_tree_1, parents, .. } = &calls[start + 4] else {
        panic!("expected final commit");
    };
    assert_eq!(parents, &vec![f.release_tip.to_string()]);
    let HostCall::ForceUpdateRef { sha: f1, .. } = &calls[start + 5] else {
        panic!("expected ref update");
    };

    // tmp2: the first real commit's tree, parented on A.
    let HostCall::CreateCommit { message, tree, parents } = &calls[start + 6] else {
        panic!("expected second temp commit");
    };
    assert_eq!(message, TEMP_COMMIT_MESSAGE);
    assert_eq!(tree, merged_tree_1);
    assert_eq!(parents, &vec![f.a.to_string()]);

    assert_eq!(
        calls[start + 8],
        HostCall::MergeBranches {
            base: BACKPORT_BRANCH.to_string(),
            head: f.b.to_string(),
        }
    );
    let HostCall::CreateCommit { parents, .. } = &calls[start + 9] else {
        panic!("expected second final commit");
    };
    assert_eq!(parents, &vec![f1.clone()]);

    assert_eq!(
        calls[start + 11],
        HostCall::CreatePullRequest {
            title: "release-21.1: sql: fix planner regression".to_string(),
            base: "release-21.1".to_string(),
            head: BACKPORT_BRANCH.to_string(),
        }
    );
}

#[tokio::test]
async fn backport_tree_applies_only_the_pull_request_diff() {
    let f = fixture();
    engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    let tip = f.host.branch_tip(BACKPORT_BRANCH).unwrap();
    let files = f.host.files(&f.host.commit(&tip).unwrap().tree).unwrap();
    assert_eq!(files["version.txt"], "21.1");
    assert_eq!(files["feature.txt"], "new feature");
    assert_eq!(files["shared.txt"], "y");
    assert_eq!(files.len(), 4);
}

#[tokio::test]
async fn backport_history_is_linear_on_top_of_the_target() {
    let f = fixture();
    let done = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    let mut cursor = f.host.branch_tip(done.backport_branch.as_str()).unwrap();
    for _ in 0..done.commits {
        let commit = f.host.commit(&cursor).unwrap();
        assert_eq!(commit.parents.len(), 1, "backport commits have one parent");
        assert_ne!(commit.message, TEMP_COMMIT_MESSAGE);
        cursor = commit.parents[0].clone();
    }
    assert_eq!(cursor, f.release_tip);
}

#[tokio::test]
async fn final_commits_keep_original_author_and_message() {
    let f = fixture();
    engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    let f2 = f.host.branch_tip(BACKPORT_BRANCH).unwrap();
    let second = f.host.commit(&f2).unwrap();
    let first = f.host.commit(&second.parents[0]).unwrap();
    let original_a = f.host.commit(&f.a).unwrap();
    let original_b = f.host.commit(&f.b).unwrap();

    assert_eq!(first.message, original_a.message);
    assert_eq!(first.author, Some(author("ada")));
    assert_eq!(second.message, original_b.message);
    assert_eq!(second.author, original_b.author);
}

#[tokio::test]
async fn pull_request_gets_reviewers_teams_and_assignee() {
    let f = fixture();
    let done = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    let opened = f.host.opened_pull_requests();
    assert_eq!(opened.len(), 1);
    let pr = &opened[0];
    assert_eq!(pr.number, done.number);
    assert_eq!(pr.reviewers, vec![login("bob"), login("carol")]);
    assert_eq!(pr.teams.len(), 1);
    assert_eq!(pr.assignees, vec![login("ada")]);
    assert!(pr
        .request
        .body
        .starts_with("Backport 2/2 commits from #100 on behalf of @ada."));
}

#[tokio::test]
async fn merge_commits_stop_the_session_before_their_final_commit() {
    let f = fixture();
    let tree = f.host.commit(&f.b).unwrap().tree;
    let merge = f.host.write_commit(&tree, &[&f.a, &f.b], "Merge branch", Some(author("ada")));
    let after = f.host.write_commit(&tree, &[&merge], "after merge", Some(author("ada")));
    let mut original = common::original(200);
    original.labels.clear();
    f.host.add_pull_request(original.clone(), &[&f.a, &merge, &after]);

    let failure = engine(&f.host)
        .run(&f.repo, &original, "backport-21.1.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::Replaying(1));
    assert_eq!(
        failure.error,
        BackportError::MergeCommitUnsupported {
            sha: merge.clone(),
            parents: 2,
        }
    );

    // Commit 0 was replayed; nothing was created for the merge or later.
    let calls = f.host.calls();
    let created = calls
        .iter()
        .filter(|c| matches!(c, HostCall::CreateCommit { .. }))
        .count();
    assert_eq!(created, 2);
    assert!(!calls.iter().any(|c| matches!(
        c,
        HostCall::MergeBranches { head, .. } if head == merge.as_str() || head == after.as_str()
    )));
    assert!(f.host.opened_pull_requests().is_empty());
}

#[tokio::test]
async fn x_label_prefers_the_bare_branch_name() {
    let f = fixture();
    f.host.set_branch("21.1", &f.release_tip);

    let done = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    assert_eq!(done.target.as_str(), "21.1");
    let lookups: Vec<HostCall> = f
        .host
        .calls()
        .into_iter()
        .filter(|c| matches!(c, HostCall::GetBranch { .. }))
        .collect();
    assert_eq!(
        lookups,
        vec![HostCall::GetBranch {
            branch: "21.1".to_string()
        }]
    );
}

#[tokio::test]
async fn label_without_x_falls_back_to_release_prefix() {
    let f = fixture();
    let done = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1")
        .await
        .unwrap();

    assert_eq!(done.target.as_str(), "release-21.1");
    let lookups: Vec<String> = f
        .host
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            HostCall::GetBranch { branch } => Some(branch),
            _ => None,
        })
        .collect();
    assert_eq!(lookups, vec!["21.1", "release-21.1"]);
}

#[tokio::test]
async fn missing_branch_reports_every_candidate() {
    let f = fixture();
    let failure = engine(&f.host)
        .run(&f.repo, &f.original, "backport-19.2.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::Resolving);
    assert_eq!(
        failure.error,
        BackportError::TargetBranchNotFound {
            tried: vec!["19.2".to_string(), "release-19.2".to_string()],
        }
    );
    assert!(failure.backport_branch.is_none());
}

#[tokio::test]
async fn failed_bare_lookup_still_tries_the_release_prefix() {
    let f = fixture();
    f.host.fail_next(
        HostOperation::GetBranch,
        HostError::Api {
            status: 502,
            message: "Bad Gateway".to_string(),
        },
    );

    let done = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    assert_eq!(done.target.as_str(), "release-21.1");
    assert_eq!(f.host.opened_pull_requests().len(), 1);
}

#[tokio::test]
async fn lookup_errors_win_over_not_found_when_no_candidate_resolves() {
    let f = fixture();
    f.host.fail_next(
        HostOperation::GetBranch,
        HostError::Api {
            status: 502,
            message: "Bad Gateway".to_string(),
        },
    );

    let failure = engine(&f.host)
        .run(&f.repo, &f.original, "backport-19.2.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::Resolving);
    let BackportError::HostApi { source, .. } = &failure.error else {
        panic!("expected a host error, got {:?}", failure.error);
    };
    assert!(matches!(source, HostError::Api { status: 502, .. }));
    let lookups = f
        .host
        .calls()
        .iter()
        .filter(|c| c.operation() == HostOperation::GetBranch)
        .count();
    assert_eq!(lookups, 2);
}

#[tokio::test]
async fn rerunning_a_backport_uses_the_same_branch_and_fails() {
    let f = fixture();
    let engine = engine(&f.host);
    let first = engine
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    let second = engine
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap_err();

    assert_eq!(
        second.error,
        BackportError::BranchAlreadyExists {
            branch: first.backport_branch.clone(),
        }
    );
    assert_eq!(second.stage, SessionStage::CreatingBranch);
    assert!(second.backport_branch.is_none());
    assert_eq!(f.host.opened_pull_requests().len(), 1);
}

#[tokio::test]
async fn conflict_keeps_earlier_commits_and_leaves_branch_on_last_pick() {
    let f = fixture();
    // The release branch already changed shared.txt differently.
    let release_tree = f.host.write_tree(&[
        ("README.md", "acme db"),
        ("shared.txt", "release-only"),
        ("version.txt", "21.1"),
    ]);
    let tip = f
        .host
        .write_commit(&release_tree, &[&f.release_tip], "release fix", Some(author("rm")));
    f.host.set_branch("release-21.1", &tip);

    let failure = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::Replaying(1));
    let BackportError::MergeConflict { sha: conflicting, branch, .. } = &failure.error else {
        panic!("expected merge conflict, got {:?}", failure.error);
    };
    assert_eq!(conflicting, &f.b);
    assert_eq!(branch.as_str(), BACKPORT_BRANCH);
    assert_eq!(failure.backport_branch.as_ref().unwrap().as_str(), BACKPORT_BRANCH);

    // The branch points at the cherry-pick of A, directly on the release tip.
    let left = f.host.branch_tip(BACKPORT_BRANCH).unwrap();
    let picked = f.host.commit(&left).unwrap();
    assert_eq!(picked.parents, vec![tip]);
    assert_eq!(picked.message, f.host.commit(&f.a).unwrap().message);
    assert!(f.host.opened_pull_requests().is_empty());
}

#[tokio::test]
async fn failed_commit_creation_aborts_without_further_calls() {
    let f = fixture();
    f.host.fail_next(
        HostOperation::CreateCommit,
        HostError::Api {
            status: 500,
            message: "Internal Server Error".to_string(),
        },
    );

    let failure = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::Replaying(0));
    assert!(matches!(failure.error, BackportError::HostApi { .. }));
    let last = f.host.calls().last().cloned().unwrap();
    assert_eq!(last.operation(), HostOperation::CreateCommit);
    // The branch exists and still points at the target tip.
    assert_eq!(f.host.branch_tip(BACKPORT_BRANCH), Some(f.release_tip.clone()));
}

#[tokio::test]
async fn failed_merge_moves_branch_off_the_temporary_commit() {
    let f = fixture();
    f.host.fail_next(
        HostOperation::MergeBranches,
        HostError::Api {
            status: 500,
            message: "Internal Server Error".to_string(),
        },
    );

    let failure = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::Replaying(0));
    assert!(matches!(failure.error, BackportError::HostApi { .. }));
    let last = f.host.calls().last().cloned().unwrap();
    assert_eq!(
        last,
        HostCall::ForceUpdateRef {
            branch: BACKPORT_BRANCH.to_string(),
            sha: f.release_tip.to_string(),
        }
    );
    assert_eq!(f.host.branch_tip(BACKPORT_BRANCH), Some(f.release_tip.clone()));
}

#[tokio::test]
async fn commit_list_failure_creates_nothing() {
    let f = fixture();
    f.host.fail_next(
        HostOperation::ListCommits,
        HostError::Transport("connection reset".to_string()),
    );

    let failure = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::ListingCommits);
    assert!(matches!(
        failure.error,
        BackportError::CommitListUnavailable { .. }
    ));
    assert!(f.host.branch_tip(BACKPORT_BRANCH).is_none());
}

#[tokio::test]
async fn pull_request_failure_leaves_a_finished_branch() {
    let f = fixture();
    f.host.fail_next(
        HostOperation::CreatePullRequest,
        HostError::Api {
            status: 422,
            message: "Validation Failed".to_string(),
        },
    );

    let failure = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SessionStage::OpeningPullRequest);
    assert!(matches!(
        failure.error,
        BackportError::PullRequestCreationFailed { .. }
    ));
    let tip = f.host.branch_tip(BACKPORT_BRANCH).unwrap();
    assert_eq!(f.host.commit(&tip).unwrap().parents.len(), 1);
}

#[tokio::test]
async fn reviewer_and_assignee_failures_do_not_undo_the_pull_request() {
    let f = fixture();
    f.host.fail_next(
        HostOperation::RequestReviewers,
        HostError::Api {
            status: 422,
            message: "Reviews may only be requested from collaborators".to_string(),
        },
    );
    f.host.fail_next(
        HostOperation::AddAssignees,
        HostError::Transport("timeout".to_string()),
    );

    let done = engine(&f.host)
        .run(&f.repo, &f.original, "backport-21.1.x")
        .await
        .unwrap();

    assert_eq!(done.follow_up.len(), 2);
    assert!(matches!(
        done.follow_up[0],
        BackportError::ReviewerRequestFailed { .. }
    ));
    assert!(matches!(
        done.follow_up[1],
        BackportError::AssigneeRequestFailed { .. }
    ));
    assert_eq!(f.host.opened_pull_requests().len(), 1);
}
