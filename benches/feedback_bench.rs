/*
One control step for a 13-joint body: feedback law -> mask -> scale,
for both schemes. This is the work done under the control lock each cycle.
*/

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use affctrl::{AffCtrl, FeedbackScheme, Gains, comm::codec::encode_command};

const DOF: usize = 13;

fn controller(scheme: FeedbackScheme) -> AffCtrl {
    let mut ctrl = AffCtrl::new(DOF, None, Some(30.0)).unwrap();
    ctrl.set_input_range(0.0, 600.0).unwrap();
    let gains = Gains::uniform(DOF, 20.0, 200.0, 2.0, 150.0);
    ctrl.set_feedback(scheme, gains).unwrap();
    ctrl.set_inactive_joints("0,7-12", 100.0);
    ctrl
}

fn ctrl_update_bench(c: &mut Criterion) {
    let q = vec![20.0; DOF];
    let dq = vec![1.0; DOF];
    let pa = vec![300.0; DOF];
    let pb = vec![250.0; DOF];
    let qdes = vec![50.0; DOF];
    let dqdes = vec![0.0; DOF];

    let mut group = c.benchmark_group("ctrl_update");
    for scheme in [FeedbackScheme::Pid, FeedbackScheme::Pidf] {
        let mut ctrl = controller(scheme);
        group.bench_function(format!("update_{scheme}"), |b| {
            b.iter(|| {
                black_box(
                    ctrl.update(0.0, &q, &dq, &pa, &pb, black_box(&qdes), &dqdes)
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

fn ctrl_update_and_encode_bench(c: &mut Criterion) {
    let mut ctrl = controller(FeedbackScheme::Pid);
    let s = vec![10.0; DOF];

    c.bench_function("ctrl_update_and_encode", |b| {
        b.iter(|| {
            let (ca, cb) = ctrl.update(0.0, &s, &s, &s, &s, black_box(&s), &s).unwrap();
            black_box(encode_command(&ca, &cb).unwrap())
        })
    });
}

criterion_group!(benches, ctrl_update_bench, ctrl_update_and_encode_bench);
criterion_main!(benches);
