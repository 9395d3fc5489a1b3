use std::sync::Arc;
use strata_core::config::{JobConfig, ModelUpdateConf, ModelUpdateRule};
use strata_core::dtype::DType;
use strata_core::error::StrataError;
use strata_graph::model_update::MdUpdtCompTaskNode;
use strata_graph::register::{BlobDesc, RegstRef};
use strata_graph::task::{CompTaskNode, PlainCompTaskNode, TaskGraph, TaskId, TaskType};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn adam_job() -> JobConfig {
    JobConfig::train().with_staleness(Some(1)).with_model_update(ModelUpdateConf {
        rule: ModelUpdateRule::Adam { beta1: 0.9, beta2: 0.999, epsilon: 1e-8 },
        learning_rate: 0.001,
    })
}

struct Tasks {
    diff_acc: TaskId,
    md_updt: TaskId,
    fw: TaskId,
    save: TaskId,
}

/// diff_acc -> md_updt -> {fw, save}
fn train_graph(diff_acc: PlainCompTaskNode) -> Result<(TaskGraph, Tasks), StrataError> {
    let mut graph = TaskGraph::new();
    let diff_acc = graph.add_node(TaskType::ModelDiffAcc, Arc::new(diff_acc));
    let md_updt = graph.add_node(TaskType::ModelUpdate, Arc::new(MdUpdtCompTaskNode::new(5)));
    let fw = graph.add_node(TaskType::Forward, Arc::new(PlainCompTaskNode::new()));
    let save = graph.add_node(TaskType::ModelSave, Arc::new(PlainCompTaskNode::new()));
    graph.add_edge(diff_acc, md_updt)?;
    graph.add_edge(md_updt, fw)?;
    graph.add_edge(md_updt, save)?;
    Ok((graph, Tasks { diff_acc, md_updt, fw, save }))
}

fn regst(producer: TaskId, name: &str) -> RegstRef {
    RegstRef { producer, name: name.into() }
}

/// Model of a single fully connected layer, then model and model_tmp are locked
fn finish_model(graph: &mut TaskGraph, md_updt: TaskId) -> Result<(), StrataError> {
    let model = regst(md_updt, "model");
    let regst_desc = graph.regst_mut(&model)?;
    regst_desc.add_lbn("fc/weight")?;
    regst_desc.set_blob_desc("fc/weight", BlobDesc::new([4, 3], DType::F32))?;
    regst_desc.set_blob_desc("fc/bias", BlobDesc::new(3, DType::F32))?;
    graph.lock_regst(&model)?;
    graph.lock_regst(&regst(md_updt, "model_tmp"))
}

#[test]
fn predict_scenario() -> Result<(), StrataError> {
    init();
    let job = JobConfig::predict();
    let (mut graph, tasks) = train_graph(PlainCompTaskNode::new())?;
    assert_eq!(graph.build(&job)?, [tasks.md_updt]);
    assert!(graph.node(tasks.fw)?.is_built());
    assert!(graph.node(tasks.save)?.is_built());
    finish_model(&mut graph, tasks.md_updt)?;
    assert!(graph.build_ready(&job)?.is_empty());
    let node = graph.node(tasks.md_updt)?;
    assert!(node.consumed_regsts().is_empty());
    assert!(node.exec_gph().is_empty());
    let model = graph.produced_regst(tasks.md_updt, "model")?;
    assert_eq!((model.min_register_num(), model.max_register_num()), (1, 1));
    Ok(())
}

#[test]
fn train_adam_scenario() -> Result<(), StrataError> {
    init();
    let job = adam_job();
    let (mut graph, tasks) = train_graph(PlainCompTaskNode::new().produce("model_diff", 1, 1))?;
    assert_eq!(graph.build(&job)?, [tasks.md_updt]);

    let model = graph.produced_regst(tasks.md_updt, "model")?;
    assert_eq!((model.min_register_num(), model.max_register_num()), (1, 2));
    let consumed = graph.node(tasks.md_updt)?.consumed_regsts().to_vec();
    assert_eq!(consumed, [("model_diff_acc_0".to_string(), regst(tasks.diff_acc, "model_diff"))]);
    assert!(graph.produced_regst(tasks.diff_acc, "model_diff")?.is_locked());

    finish_model(&mut graph, tasks.md_updt)?;
    assert!(graph.build_ready(&job)?.is_empty());

    let node = graph.node(tasks.md_updt)?;
    assert_eq!(node.exec_gph().len(), 1);
    let exec = &node.exec_gph().nodes()[0];
    assert_eq!(exec.op().name(), "md_update_1");
    assert_eq!(exec.op().op_type(), "adam_model_update");
    assert_eq!(exec.regst4bn("model_diffs_0"), Some(&regst(tasks.diff_acc, "model_diff")));
    assert_eq!(exec.regst4bn("model"), Some(&regst(tasks.md_updt, "model")));
    assert_eq!(exec.regst4bn("m"), Some(&regst(tasks.md_updt, "data_tmp")));
    assert_eq!(exec.regst4bn("v"), Some(&regst(tasks.md_updt, "data_tmp")));

    let data_tmp = graph.produced_regst(tasks.md_updt, "data_tmp")?;
    assert!(data_tmp.is_locked());
    assert_eq!(data_tmp.lbns().collect::<Vec<_>>(), ["md_update_1/m", "md_update_1/v"]);
    let packed = BlobDesc::new(15, DType::F32);
    assert_eq!(data_tmp.blob_desc("md_update_1/m")?, Some(&packed));
    assert_eq!(data_tmp.blob_desc("md_update_1/v")?, Some(&packed));

    let proto = graph.to_proto(tasks.md_updt, &job)?;
    assert_eq!(proto.related_fw_task_id, tasks.fw.0);
    assert_eq!(proto.related_save_task_id, tasks.save.0);
    assert_eq!(proto.exec_sequence[0].op_name, "md_update_1");
    let bns: Vec<&str> = proto.exec_sequence[0].bindings.iter().map(|b| b.bn_in_op.as_str()).collect();
    assert_eq!(bns, ["m", "model", "model_diffs_0", "v"]);
    Ok(())
}

#[test]
fn model_diff_shape_must_match_model() -> Result<(), StrataError> {
    let job = adam_job();
    let (mut graph, tasks) = train_graph(PlainCompTaskNode::new())?;
    let diff = graph.produce_regst(tasks.diff_acc, "model_diff", 1, 1)?;
    graph.regst_mut(&diff)?.set_blob_desc("acc/out", BlobDesc::new(4, DType::F32))?;
    let edge = graph.node(tasks.diff_acc)?.out_edges()[0];
    graph.add_regst_to_edge(edge, "model_diff", diff)?;
    graph.build(&job)?;
    finish_model(&mut graph, tasks.md_updt)?;
    assert!(matches!(graph.build_ready(&job), Err(StrataError::ShapeError(_))));
    Ok(())
}

#[test]
fn model_dtype_must_be_job_default() -> Result<(), StrataError> {
    let job = adam_job();
    let (mut graph, tasks) = train_graph(PlainCompTaskNode::new().produce("model_diff", 1, 1))?;
    graph.build(&job)?;
    let model = regst(tasks.md_updt, "model");
    graph.regst_mut(&model)?.set_blob_desc("fc/weight", BlobDesc::new([4, 3], DType::F64))?;
    graph.lock_regst(&model)?;
    graph.lock_regst(&regst(tasks.md_updt, "model_tmp"))?;
    assert!(matches!(graph.build_ready(&job), Err(StrataError::DTypeError(_))));
    Ok(())
}

#[test]
fn edge_with_two_registers() -> Result<(), StrataError> {
    let (mut graph, _) = train_graph(PlainCompTaskNode::new().produce("model_diff", 1, 1).produce("extra", 1, 1))?;
    assert!(matches!(graph.build(&adam_job()), Err(StrataError::RegisterBindingMismatch(_))));
    Ok(())
}

#[test]
fn produce_is_idempotent() -> Result<(), StrataError> {
    let job = adam_job();
    let (mut graph, tasks) = train_graph(PlainCompTaskNode::new().produce("model_diff", 1, 1))?;
    let behaviour = MdUpdtCompTaskNode::new(5);
    behaviour.produce_all_regsts_and_bind_edges(&mut graph, tasks.md_updt, &job)?;
    let ids: Vec<i64> = graph.node(tasks.md_updt)?.produced_regsts().map(|r| r.regst_desc_id()).collect();
    behaviour.produce_all_regsts_and_bind_edges(&mut graph, tasks.md_updt, &job)?;
    let again: Vec<i64> = graph.node(tasks.md_updt)?.produced_regsts().map(|r| r.regst_desc_id()).collect();
    assert_eq!(ids, again);
    let fw_edge = graph.node(tasks.md_updt)?.out_edges()[0];
    assert_eq!(graph.edge(fw_edge)?.regsts().len(), 2);

    let stale = job.with_staleness(Some(3));
    assert!(matches!(
        behaviour.produce_all_regsts_and_bind_edges(&mut graph, tasks.md_updt, &stale),
        Err(StrataError::DuplicateAssignment(_))
    ));
    Ok(())
}
